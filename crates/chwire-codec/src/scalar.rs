//! Row-concatenated layouts: numerics, strings, dates, identifiers.
//!
//! | Type               | Bytes per row | Layout                                    |
//! |--------------------|---------------|-------------------------------------------|
//! | (U)Int8..(U)Int256 | 1..32         | little-endian two's complement            |
//! | Float32/64         | 4/8           | IEEE 754, little-endian                   |
//! | Bool, Nothing      | 1             | 0/1, placeholder `0`                      |
//! | String             | varint + n    | byte length, raw bytes                    |
//! | FixedString(n)     | n             | raw bytes, zero-padded                    |
//! | Date / Date32      | 2 / 4         | days since epoch (u16 / i32)              |
//! | DateTime / 64      | 4 / 8         | seconds (u32) / ticks (i64)               |
//! | UUID               | 16            | high u64 LE, then low u64 LE              |
//! | IPv4 / IPv6        | 4 / 16        | u32 LE / network-order octets             |
//! | Decimal(P,S)       | 4/8/16/32     | scaled mantissa, width by precision       |
//! | Enum8 / Enum16     | 1 / 2         | signed member value                       |

use std::net::{Ipv4Addr, Ipv6Addr};

use chwire_error::{ChError, Result};
use chwire_types::column_type::decimal_width;
use chwire_types::limits::{MAX_PREALLOC_ROWS, MAX_STRING_LEN};
use chwire_types::{
    ColumnType, Decimal, U256, Value, WireRead, WireReadExt, WireWrite, WireWriteExt, i256,
};
use uuid::Uuid;

use crate::convert::convert_value;

/// Bytes read per chunk for fixed-width columns.
const FIXED_READ_CHUNK: usize = 64 * 1024;

fn le<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Append the encoding of one scalar value.
///
/// Values that are not already canonical for `ty` go through
/// [`convert_value`] first.
#[allow(clippy::too_many_lines)]
pub fn write_scalar(ty: &ColumnType, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match (ty, value) {
        (ColumnType::Nothing, Value::Null) => out.put_u8(b'0'),
        (ColumnType::Bool, Value::Bool(v)) => out.put_u8(u8::from(*v)),
        (ColumnType::UInt8, Value::UInt8(v)) => out.put_u8(*v),
        (ColumnType::UInt16, Value::UInt16(v)) => out.put_u16_le(*v),
        (ColumnType::UInt32, Value::UInt32(v)) => out.put_u32_le(*v),
        (ColumnType::UInt64, Value::UInt64(v)) => out.put_u64_le(*v),
        (ColumnType::UInt128, Value::UInt128(v)) => out.put_u128_le(*v),
        (ColumnType::UInt256, Value::UInt256(v)) => out.put_bytes(&v.to_le_bytes()),
        (ColumnType::Int8, Value::Int8(v)) => out.put_i8(*v),
        (ColumnType::Int16, Value::Int16(v)) => out.put_i16_le(*v),
        (ColumnType::Int32, Value::Int32(v)) => out.put_i32_le(*v),
        (ColumnType::Int64, Value::Int64(v)) => out.put_i64_le(*v),
        (ColumnType::Int128, Value::Int128(v)) => out.put_i128_le(*v),
        (ColumnType::Int256, Value::Int256(v)) => out.put_bytes(&v.to_le_bytes()),
        (ColumnType::Float32, Value::Float32(v)) => out.put_f32_le(*v),
        (ColumnType::Float64, Value::Float64(v)) => out.put_f64_le(*v),
        (ColumnType::String, Value::String(bytes)) => {
            if bytes.len() > MAX_STRING_LEN {
                return Err(ChError::codec(
                    "String",
                    format!("value is {} bytes, limit is {MAX_STRING_LEN}", bytes.len()),
                ));
            }
            out.put_string(bytes);
        }
        (ColumnType::FixedString(n), Value::String(bytes)) => {
            if bytes.len() > *n {
                return Err(ChError::codec(
                    ty.to_string(),
                    format!("value is {} bytes, column holds {n}", bytes.len()),
                ));
            }
            out.put_bytes(bytes);
            out.resize(out.len() + (n - bytes.len()), 0);
        }
        (ColumnType::Date, Value::Date(v)) => out.put_u16_le(*v),
        (ColumnType::Date32, Value::Date32(v)) => out.put_i32_le(*v),
        (ColumnType::DateTime { .. }, Value::DateTime(v)) => out.put_u32_le(*v),
        (ColumnType::DateTime64 { .. }, Value::DateTime64(v)) => out.put_i64_le(*v),
        (ColumnType::Uuid, Value::Uuid(v)) => {
            let (high, low) = v.as_u64_pair();
            out.put_u64_le(high);
            out.put_u64_le(low);
        }
        (ColumnType::IPv4, Value::IPv4(v)) => out.put_u32_le(u32::from(*v)),
        (ColumnType::IPv6, Value::IPv6(v)) => out.put_bytes(&v.octets()),
        (ColumnType::Decimal { precision, scale }, Value::Decimal(d))
            if d.scale() == *scale && d.fits_precision(*precision) =>
        {
            write_decimal(ty, *precision, *d, out)?;
        }
        (ColumnType::Enum8(_), Value::Enum { value, .. }) if ty.enum_name_of(*value).is_some() => {
            let v = i8::try_from(*value).map_err(|_| ChError::overflow(ty.to_string(), value))?;
            out.put_i8(v);
        }
        (ColumnType::Enum16(_), Value::Enum { value, .. }) if ty.enum_name_of(*value).is_some() => {
            out.put_i16_le(*value);
        }
        (
            ColumnType::Nullable(_)
            | ColumnType::LowCardinality(_)
            | ColumnType::Array(_)
            | ColumnType::Tuple(_)
            | ColumnType::Map(..),
            _,
        ) => {
            return Err(ChError::internal(format!(
                "{ty} is not a scalar layout"
            )));
        }
        _ => {
            let converted = convert_value(ty, value.clone())?;
            if converted == *value || converted.is_null() {
                return Err(ChError::codec(
                    ty.to_string(),
                    format!("no encoding for {} value {value}", value.kind_name()),
                ));
            }
            return write_scalar(ty, &converted, out);
        }
    }
    Ok(())
}

fn write_decimal(ty: &ColumnType, precision: u8, d: Decimal, out: &mut Vec<u8>) -> Result<()> {
    let mantissa = d.mantissa();
    let narrow = || -> Result<i128> {
        mantissa
            .to_i128()
            .ok_or_else(|| ChError::overflow(ty.to_string(), d))
    };
    match decimal_width(precision) {
        4 => out.put_i32_le(i32::try_from(narrow()?).map_err(|_| ChError::overflow(ty.to_string(), d))?),
        8 => out.put_i64_le(i64::try_from(narrow()?).map_err(|_| ChError::overflow(ty.to_string(), d))?),
        16 => out.put_i128_le(narrow()?),
        _ => out.put_bytes(&mantissa.to_le_bytes()),
    }
    Ok(())
}

/// Read `rows` fixed-width cells, handing each to `cell`.
fn read_fixed(
    reader: &mut dyn WireRead,
    rows: usize,
    width: usize,
    mut cell: impl FnMut(&[u8]) -> Result<Value>,
) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(rows.min(MAX_PREALLOC_ROWS));
    if width == 0 {
        return Err(ChError::internal("zero-width fixed column"));
    }
    let chunk_rows = (FIXED_READ_CHUNK / width).max(1);
    let mut buf = Vec::new();
    let mut remaining = rows;
    while remaining > 0 {
        let take = remaining.min(chunk_rows);
        buf.resize(take * width, 0);
        reader.read_exact(&mut buf)?;
        for raw in buf.chunks_exact(width) {
            values.push(cell(raw)?);
        }
        remaining -= take;
    }
    Ok(values)
}

/// Decode `rows` values of a scalar layout.
#[allow(clippy::too_many_lines)]
pub fn read_scalar_column(
    ty: &ColumnType,
    reader: &mut dyn WireRead,
    rows: usize,
) -> Result<Vec<Value>> {
    match ty {
        ColumnType::String => {
            let mut values = Vec::with_capacity(rows.min(MAX_PREALLOC_ROWS));
            for _ in 0..rows {
                values.push(Value::String(reader.read_string_bytes()?));
            }
            Ok(values)
        }
        ColumnType::Nothing => read_fixed(reader, rows, 1, |_| Ok(Value::Null)),
        ColumnType::Bool => read_fixed(reader, rows, 1, |b| Ok(Value::Bool(b[0] != 0))),
        ColumnType::UInt8 => read_fixed(reader, rows, 1, |b| Ok(Value::UInt8(b[0]))),
        ColumnType::UInt16 => read_fixed(reader, rows, 2, |b| Ok(Value::UInt16(u16::from_le_bytes(le(b))))),
        ColumnType::UInt32 => read_fixed(reader, rows, 4, |b| Ok(Value::UInt32(u32::from_le_bytes(le(b))))),
        ColumnType::UInt64 => read_fixed(reader, rows, 8, |b| Ok(Value::UInt64(u64::from_le_bytes(le(b))))),
        ColumnType::UInt128 => read_fixed(reader, rows, 16, |b| {
            Ok(Value::UInt128(u128::from_le_bytes(le(b))))
        }),
        ColumnType::UInt256 => read_fixed(reader, rows, 32, |b| {
            Ok(Value::UInt256(U256::from_le_bytes(le(b))))
        }),
        ColumnType::Int8 => read_fixed(reader, rows, 1, |b| Ok(Value::Int8(i8::from_le_bytes(le(b))))),
        ColumnType::Int16 => read_fixed(reader, rows, 2, |b| Ok(Value::Int16(i16::from_le_bytes(le(b))))),
        ColumnType::Int32 => read_fixed(reader, rows, 4, |b| Ok(Value::Int32(i32::from_le_bytes(le(b))))),
        ColumnType::Int64 => read_fixed(reader, rows, 8, |b| Ok(Value::Int64(i64::from_le_bytes(le(b))))),
        ColumnType::Int128 => read_fixed(reader, rows, 16, |b| {
            Ok(Value::Int128(i128::from_le_bytes(le(b))))
        }),
        ColumnType::Int256 => read_fixed(reader, rows, 32, |b| {
            Ok(Value::Int256(i256::from_le_bytes(le(b))))
        }),
        ColumnType::Float32 => read_fixed(reader, rows, 4, |b| {
            Ok(Value::Float32(f32::from_le_bytes(le(b))))
        }),
        ColumnType::Float64 => read_fixed(reader, rows, 8, |b| {
            Ok(Value::Float64(f64::from_le_bytes(le(b))))
        }),
        ColumnType::FixedString(n) => read_fixed(reader, rows, *n, |b| Ok(Value::String(b.to_vec()))),
        ColumnType::Date => read_fixed(reader, rows, 2, |b| Ok(Value::Date(u16::from_le_bytes(le(b))))),
        ColumnType::Date32 => read_fixed(reader, rows, 4, |b| Ok(Value::Date32(i32::from_le_bytes(le(b))))),
        ColumnType::DateTime { .. } => read_fixed(reader, rows, 4, |b| {
            Ok(Value::DateTime(u32::from_le_bytes(le(b))))
        }),
        ColumnType::DateTime64 { .. } => read_fixed(reader, rows, 8, |b| {
            Ok(Value::DateTime64(i64::from_le_bytes(le(b))))
        }),
        ColumnType::Uuid => read_fixed(reader, rows, 16, |b| {
            let high = u64::from_le_bytes(le(&b[..8]));
            let low = u64::from_le_bytes(le(&b[8..]));
            Ok(Value::Uuid(Uuid::from_u64_pair(high, low)))
        }),
        ColumnType::IPv4 => read_fixed(reader, rows, 4, |b| {
            Ok(Value::IPv4(Ipv4Addr::from(u32::from_le_bytes(le(b)))))
        }),
        ColumnType::IPv6 => read_fixed(reader, rows, 16, |b| {
            Ok(Value::IPv6(Ipv6Addr::from(le::<16>(b))))
        }),
        ColumnType::Decimal { precision, scale } => {
            let scale = *scale;
            match decimal_width(*precision) {
                4 => read_fixed(reader, rows, 4, |b| {
                    Ok(decimal_value(i128::from(i32::from_le_bytes(le(b))), scale))
                }),
                8 => read_fixed(reader, rows, 8, |b| {
                    Ok(decimal_value(i128::from(i64::from_le_bytes(le(b))), scale))
                }),
                16 => read_fixed(reader, rows, 16, |b| {
                    Ok(decimal_value(i128::from_le_bytes(le(b)), scale))
                }),
                _ => read_fixed(reader, rows, 32, |b| {
                    Ok(Value::Decimal(Decimal::new(i256::from_le_bytes(le(b)), scale)))
                }),
            }
        }
        ColumnType::Enum8(_) => read_fixed(reader, rows, 1, |b| {
            enum_value(ty, i16::from(i8::from_le_bytes(le(b))))
        }),
        ColumnType::Enum16(_) => read_fixed(reader, rows, 2, |b| {
            enum_value(ty, i16::from_le_bytes(le(b)))
        }),
        ColumnType::Nullable(_)
        | ColumnType::LowCardinality(_)
        | ColumnType::Array(_)
        | ColumnType::Tuple(_)
        | ColumnType::Map(..) => Err(ChError::internal(format!("{ty} is not a scalar layout"))),
    }
}

fn decimal_value(mantissa: i128, scale: u8) -> Value {
    Value::Decimal(Decimal::from_i128(mantissa, scale))
}

fn enum_value(ty: &ColumnType, value: i16) -> Result<Value> {
    let name = ty.enum_name_of(value).ok_or_else(|| {
        ChError::codec(ty.to_string(), format!("value {value} is not a member"))
    })?;
    Ok(Value::Enum {
        name: name.to_owned(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chwire_types::{SliceReader, parse_type};

    fn bytes_of(ty: &str, value: impl Into<Value>) -> Vec<u8> {
        let mut out = Vec::new();
        write_scalar(&parse_type(ty).expect("type"), &value.into(), &mut out).expect("encode");
        out
    }

    #[test]
    fn exact_layouts() {
        assert_eq!(bytes_of("Int16", -2i16), vec![0xfe, 0xff]);
        assert_eq!(bytes_of("String", "abc"), vec![3, b'a', b'b', b'c']);
        assert_eq!(bytes_of("FixedString(4)", "ab"), vec![b'a', b'b', 0, 0]);
        assert_eq!(bytes_of("IPv4", Ipv4Addr::new(1, 2, 3, 4)), vec![4, 3, 2, 1]);
        assert_eq!(bytes_of("Bool", true), vec![1]);
        assert_eq!(
            bytes_of("Decimal(9, 2)", Decimal::from_i128(-150, 2)),
            (-150i32).to_le_bytes().to_vec()
        );
        assert_eq!(
            bytes_of("Enum8('a' = -3)", "a"),
            vec![0xfd],
        );
    }

    #[test]
    fn uuid_halves_are_swapped_little_endian() {
        let id = Uuid::from_u64_pair(0x0102_0304_0506_0708, 0x090a_0b0c_0d0e_0f10);
        let bytes = bytes_of("UUID", id);
        assert_eq!(&bytes[..8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&bytes[8..], &0x090a_0b0c_0d0e_0f10u64.to_le_bytes());
        let decoded = read_scalar_column(&ColumnType::Uuid, &mut SliceReader::new(&bytes), 1)
            .expect("decode");
        assert_eq!(decoded, vec![Value::Uuid(id)]);
    }

    #[test]
    fn non_canonical_values_are_converted() {
        assert_eq!(bytes_of("UInt64", 7u8), 7u64.to_le_bytes().to_vec());
        assert_eq!(bytes_of("Decimal(18, 3)", "1.5"), 1500i64.to_le_bytes().to_vec());
    }

    #[test]
    fn oversized_fixed_string_rejected() {
        let mut out = Vec::new();
        let err = write_scalar(&ColumnType::FixedString(2), &Value::from("abc"), &mut out)
            .unwrap_err();
        assert!(matches!(err, ChError::Codec { .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn unknown_enum_value_on_read() {
        let ty = parse_type("Enum8('a' = 1)").expect("type");
        let err = read_scalar_column(&ty, &mut SliceReader::new(&[9]), 1).unwrap_err();
        assert!(err.to_string().contains("not a member"), "{err}");
    }

    #[test]
    fn truncated_fixed_column() {
        let err = read_scalar_column(&ColumnType::UInt32, &mut SliceReader::new(&[1, 2, 3]), 1)
            .unwrap_err();
        assert!(err.is_fatal_to_connection());
    }
}
