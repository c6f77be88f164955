//! Conversion of application values into the canonical value of a column type.
//!
//! The canonical value is the variant decoding would produce for that type.
//! Every narrowing is range-checked and reported as [`ChError::Overflow`];
//! nothing wraps or truncates silently.

use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chwire_error::{ChError, Result};
use chwire_types::decimal::pow10;
use chwire_types::{ColumnType, Decimal, U256, Value, i256};
use uuid::Uuid;

fn mismatch(ty: &ColumnType, value: &Value) -> ChError {
    ChError::codec(
        ty.to_string(),
        format!("cannot convert {} value {value} to {ty}", value.kind_name()),
    )
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Convert `value` into the canonical representation for `ty`.
pub fn convert_value(ty: &ColumnType, value: Value) -> Result<Value> {
    if value.is_null() {
        return if ty.accepts_null() {
            Ok(Value::Null)
        } else {
            Err(ChError::codec(
                ty.to_string(),
                "NULL is not allowed in a non-nullable column",
            ))
        };
    }
    match ty {
        ColumnType::Nullable(inner) | ColumnType::LowCardinality(inner) => {
            convert_value(inner, value)
        }
        ColumnType::Nothing => Err(mismatch(ty, &value)),
        ColumnType::Array(inner) => match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| convert_value(inner, item))
                .collect::<Result<_>>()
                .map(Value::Array),
            other => Err(mismatch(ty, &other)),
        },
        ColumnType::Tuple(elements) => match value {
            Value::Tuple(items) if items.len() == elements.len() => items
                .into_iter()
                .zip(elements)
                .map(|(item, element)| convert_value(&element.ty, item))
                .collect::<Result<_>>()
                .map(Value::Tuple),
            Value::Tuple(items) => Err(ChError::codec(
                ty.to_string(),
                format!(
                    "tuple has {} elements, column expects {}",
                    items.len(),
                    elements.len()
                ),
            )),
            other => Err(mismatch(ty, &other)),
        },
        ColumnType::Map(key_ty, value_ty) => match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((convert_value(key_ty, k)?, convert_value(value_ty, v)?)))
                .collect::<Result<_>>()
                .map(Value::Map),
            other => Err(mismatch(ty, &other)),
        },
        _ => convert_scalar(ty, value),
    }
}

macro_rules! int_target {
    ($ty:expr, $value:expr, $variant:ident, $rust:ty) => {{
        if let Value::$variant(v) = $value {
            return Ok(Value::$variant(v));
        }
        let wide = wide_integer($ty, &$value)?;
        <$rust>::try_from(wide)
            .map(Value::$variant)
            .map_err(|_| ChError::overflow($ty.to_string(), &$value))
    }};
}

/// Integer payload of `value` as `i128`; anything wider overflows.
fn wide_integer(ty: &ColumnType, value: &Value) -> Result<i128> {
    match value {
        Value::Float32(_)
        | Value::Float64(_)
        | Value::String(_)
        | Value::Decimal(_)
        | Value::Array(_)
        | Value::Tuple(_)
        | Value::Map(_)
        | Value::Uuid(_)
        | Value::IPv4(_)
        | Value::IPv6(_)
        | Value::Timestamp(_)
        | Value::Null => Err(mismatch(ty, value)),
        other => other
            .as_i128()
            .ok_or_else(|| ChError::overflow(ty.to_string(), other)),
    }
}

#[allow(clippy::too_many_lines)]
fn convert_scalar(ty: &ColumnType, value: Value) -> Result<Value> {
    match ty {
        ColumnType::UInt8 => int_target!(ty, value, UInt8, u8),
        ColumnType::UInt16 => int_target!(ty, value, UInt16, u16),
        ColumnType::UInt32 => int_target!(ty, value, UInt32, u32),
        ColumnType::UInt64 => int_target!(ty, value, UInt64, u64),
        ColumnType::Int8 => int_target!(ty, value, Int8, i8),
        ColumnType::Int16 => int_target!(ty, value, Int16, i16),
        ColumnType::Int32 => int_target!(ty, value, Int32, i32),
        ColumnType::Int64 => int_target!(ty, value, Int64, i64),
        ColumnType::Int128 => match value {
            Value::Int128(v) => Ok(Value::Int128(v)),
            Value::UInt128(v) => i128::try_from(v)
                .map(Value::Int128)
                .map_err(|_| ChError::overflow(ty.to_string(), v)),
            other => Ok(Value::Int128(wide_integer(ty, &other)?)),
        },
        ColumnType::UInt128 => match value {
            Value::UInt128(v) => Ok(Value::UInt128(v)),
            Value::UInt256(v) => v
                .to_u128()
                .map(Value::UInt128)
                .ok_or_else(|| ChError::overflow(ty.to_string(), v)),
            Value::Int256(v) => v
                .to_i128()
                .and_then(|v| u128::try_from(v).ok())
                .map(Value::UInt128)
                .ok_or_else(|| ChError::overflow(ty.to_string(), Value::Int256(v))),
            other => {
                let wide = wide_integer(ty, &other)?;
                u128::try_from(wide)
                    .map(Value::UInt128)
                    .map_err(|_| ChError::overflow(ty.to_string(), &other))
            }
        },
        ColumnType::Int256 => match value {
            Value::Int256(v) => Ok(Value::Int256(v)),
            Value::UInt128(v) => {
                let mut bytes = [0u8; 32];
                bytes[..16].copy_from_slice(&v.to_le_bytes());
                Ok(Value::Int256(i256::from_le_bytes(bytes)))
            }
            Value::UInt256(v) => {
                let bytes = v.to_le_bytes();
                if bytes[31] & 0x80 != 0 {
                    return Err(ChError::overflow(ty.to_string(), v));
                }
                Ok(Value::Int256(i256::from_le_bytes(bytes)))
            }
            other => Ok(Value::Int256(i256::from_i128(wide_integer(ty, &other)?))),
        },
        ColumnType::UInt256 => match value {
            Value::UInt256(v) => Ok(Value::UInt256(v)),
            Value::UInt128(v) => Ok(Value::UInt256(U256::from(v))),
            Value::Int256(v) => {
                if v < i256::ZERO {
                    return Err(ChError::overflow(ty.to_string(), Value::Int256(v)));
                }
                Ok(Value::UInt256(U256::from_le_bytes(v.to_le_bytes())))
            }
            other => {
                let wide = wide_integer(ty, &other)?;
                u128::try_from(wide)
                    .map(|v| Value::UInt256(U256::from(v)))
                    .map_err(|_| ChError::overflow(ty.to_string(), &other))
            }
        },
        ColumnType::Float32 => match value {
            Value::Float32(v) => Ok(Value::Float32(v)),
            #[allow(clippy::cast_possible_truncation)]
            Value::Float64(v) => {
                let narrowed = v as f32;
                if v.is_finite() && !narrowed.is_finite() {
                    return Err(ChError::overflow(ty.to_string(), v));
                }
                Ok(Value::Float32(narrowed))
            }
            #[allow(clippy::cast_precision_loss)]
            other => Ok(Value::Float32(wide_integer(ty, &other)? as f32)),
        },
        ColumnType::Float64 => match value {
            Value::Float64(v) => Ok(Value::Float64(v)),
            Value::Float32(v) => Ok(Value::Float64(f64::from(v))),
            #[allow(clippy::cast_precision_loss)]
            other => Ok(Value::Float64(wide_integer(ty, &other)? as f64)),
        },
        ColumnType::Bool => match value {
            Value::Bool(v) => Ok(Value::Bool(v)),
            other => match wide_integer(ty, &other)? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                _ => Err(ChError::overflow(ty.to_string(), &other)),
            },
        },
        ColumnType::String => match value {
            Value::String(bytes) => Ok(Value::String(bytes)),
            Value::Enum { name, .. } => Ok(Value::String(name.into_bytes())),
            other => Err(mismatch(ty, &other)),
        },
        ColumnType::FixedString(n) => match value {
            Value::String(mut bytes) => {
                if bytes.len() > *n {
                    return Err(ChError::codec(
                        ty.to_string(),
                        format!("value is {} bytes, column holds {n}", bytes.len()),
                    ));
                }
                bytes.resize(*n, 0);
                Ok(Value::String(bytes))
            }
            other => Err(mismatch(ty, &other)),
        },
        ColumnType::Date => match value {
            Value::Date(v) => Ok(Value::Date(v)),
            other => {
                let days = days_of(ty, &other)?;
                u16::try_from(days)
                    .map(Value::Date)
                    .map_err(|_| ChError::overflow(ty.to_string(), &other))
            }
        },
        ColumnType::Date32 => match value {
            Value::Date32(v) => Ok(Value::Date32(v)),
            other => {
                let days = days_of(ty, &other)?;
                i32::try_from(days)
                    .map(Value::Date32)
                    .map_err(|_| ChError::overflow(ty.to_string(), &other))
            }
        },
        ColumnType::DateTime { .. } => match value {
            Value::DateTime(v) => Ok(Value::DateTime(v)),
            other => {
                let seconds = match &other {
                    Value::Timestamp(ts) => i128::from(ts.timestamp()),
                    Value::String(_) => i128::from(parse_datetime(ty, &other)?.timestamp()),
                    _ => wide_integer(ty, &other)?,
                };
                u32::try_from(seconds)
                    .map(Value::DateTime)
                    .map_err(|_| ChError::overflow(ty.to_string(), &other))
            }
        },
        ColumnType::DateTime64 { scale, .. } => match value {
            Value::DateTime64(v) => Ok(Value::DateTime64(v)),
            other => {
                let ticks = match &other {
                    Value::Timestamp(ts) => timestamp_ticks(*ts, *scale),
                    Value::String(_) => timestamp_ticks(parse_datetime(ty, &other)?, *scale),
                    _ => i64::try_from(wide_integer(ty, &other)?).ok(),
                };
                ticks
                    .map(Value::DateTime64)
                    .ok_or_else(|| ChError::overflow(ty.to_string(), &other))
            }
        },
        ColumnType::Uuid => match value {
            Value::Uuid(v) => Ok(Value::Uuid(v)),
            Value::UInt128(v) => Ok(Value::Uuid(Uuid::from_u128(v))),
            other => {
                let text = other.as_str().ok_or_else(|| mismatch(ty, &other))?;
                Uuid::parse_str(text)
                    .map(Value::Uuid)
                    .map_err(|e| ChError::codec(ty.to_string(), format!("invalid UUID '{text}': {e}")))
            }
        },
        ColumnType::IPv4 => match value {
            Value::IPv4(v) => Ok(Value::IPv4(v)),
            Value::UInt32(v) => Ok(Value::IPv4(Ipv4Addr::from(v))),
            other => {
                let text = other.as_str().ok_or_else(|| mismatch(ty, &other))?;
                text.parse::<Ipv4Addr>()
                    .map(Value::IPv4)
                    .map_err(|e| ChError::codec(ty.to_string(), format!("invalid IPv4 '{text}': {e}")))
            }
        },
        ColumnType::IPv6 => match value {
            Value::IPv6(v) => Ok(Value::IPv6(v)),
            Value::IPv4(v) => Ok(Value::IPv6(v.to_ipv6_mapped())),
            other => {
                let text = other.as_str().ok_or_else(|| mismatch(ty, &other))?;
                text.parse::<Ipv6Addr>()
                    .map(Value::IPv6)
                    .map_err(|e| ChError::codec(ty.to_string(), format!("invalid IPv6 '{text}': {e}")))
            }
        },
        ColumnType::Decimal { precision, scale } => {
            let decimal = match &value {
                Value::Decimal(d) => d.rescale(*scale),
                Value::String(_) => {
                    let text = value.as_str().ok_or_else(|| mismatch(ty, &value))?;
                    Decimal::parse(text)
                        .map_err(|_| mismatch(ty, &value))?
                        .rescale(*scale)
                }
                Value::Float32(_) | Value::Float64(_) => {
                    let v = match value {
                        Value::Float32(v) => f64::from(v),
                        Value::Float64(v) => v,
                        _ => 0.0,
                    };
                    if !v.is_finite() {
                        return Err(ChError::overflow(ty.to_string(), v));
                    }
                    Decimal::parse(&v.to_string())
                        .and_then(|d| d.round_to(*scale))
                }
                Value::Int256(v) => Decimal::new(*v, 0).rescale(*scale),
                Value::UInt128(v) => {
                    let mut bytes = [0u8; 32];
                    bytes[..16].copy_from_slice(&v.to_le_bytes());
                    Decimal::new(i256::from_le_bytes(bytes), 0).rescale(*scale)
                }
                other => Decimal::from_i128(wide_integer(ty, other)?, 0).rescale(*scale),
            }
            .map_err(|_| ChError::overflow(ty.to_string(), &value))?;
            if !decimal.fits_precision(*precision) {
                return Err(ChError::overflow(ty.to_string(), decimal));
            }
            Ok(Value::Decimal(decimal))
        }
        ColumnType::Enum8(_) | ColumnType::Enum16(_) => {
            let (name, number) = match &value {
                Value::Enum { name, .. } => (Some(name.as_str()), ty.enum_value_of(name)),
                Value::String(_) => {
                    let name = value.as_str().ok_or_else(|| mismatch(ty, &value))?;
                    (Some(name), ty.enum_value_of(name))
                }
                other => {
                    let wide = wide_integer(ty, other)?;
                    let number = i16::try_from(wide)
                        .map_err(|_| ChError::overflow(ty.to_string(), other))?;
                    (None, ty.enum_name_of(number).map(|_| number))
                }
            };
            let Some(number) = number else {
                return Err(ChError::codec(
                    ty.to_string(),
                    match name {
                        Some(name) => format!("unknown enum member '{name}'"),
                        None => format!("unknown enum value {value}"),
                    },
                ));
            };
            let name = ty.enum_name_of(number).unwrap_or_default().to_owned();
            Ok(Value::Enum {
                name,
                value: number,
            })
        }
        _ => Err(mismatch(ty, &value)),
    }
}

fn days_of(ty: &ColumnType, value: &Value) -> Result<i128> {
    match value {
        Value::Date(d) => Ok(i128::from(*d)),
        Value::Date32(d) => Ok(i128::from(*d)),
        Value::Timestamp(ts) => Ok(i128::from(
            ts.date_naive().signed_duration_since(epoch()).num_days(),
        )),
        Value::String(_) => {
            let text = value.as_str().ok_or_else(|| mismatch(ty, value))?;
            let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .map_err(|e| ChError::codec(ty.to_string(), format!("invalid date '{text}': {e}")))?;
            Ok(i128::from(date.signed_duration_since(epoch()).num_days()))
        }
        other => wide_integer(ty, other),
    }
}

fn parse_datetime(ty: &ColumnType, value: &Value) -> Result<DateTime<Utc>> {
    let text = value.as_str().ok_or_else(|| mismatch(ty, value))?.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| ChError::codec(ty.to_string(), format!("invalid datetime '{text}': {e}")))
}

fn timestamp_ticks(ts: DateTime<Utc>, scale: u8) -> Option<i64> {
    let per_second = pow10(scale)?.to_i128()?;
    let sub_divisor = pow10(9u8.checked_sub(scale)?)?.to_i128()?;
    let ticks = i128::from(ts.timestamp())
        .checked_mul(per_second)?
        .checked_add(i128::from(ts.timestamp_subsec_nanos()) / sub_divisor)?;
    i64::try_from(ticks).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chwire_types::parse_type;

    fn conv(ty: &str, value: impl Into<Value>) -> Result<Value> {
        convert_value(&parse_type(ty).expect("type"), value.into())
    }

    #[test]
    fn integer_range_checks() {
        assert_eq!(conv("UInt8", 255i64).expect("fits"), Value::UInt8(255));
        assert!(matches!(conv("UInt8", 256i64), Err(ChError::Overflow { .. })));
        assert!(matches!(conv("UInt64", -1i32), Err(ChError::Overflow { .. })));
        assert_eq!(conv("Int8", -128i64).expect("fits"), Value::Int8(-128));
        assert_eq!(
            conv("Int128", u64::MAX).expect("widen"),
            Value::Int128(i128::from(u64::MAX))
        );
        assert!(matches!(conv("Int128", u128::MAX), Err(ChError::Overflow { .. })));
        assert!(matches!(conv("UInt256", i256::MINUS_ONE), Err(ChError::Overflow { .. })));
        assert!(conv("Int32", 1.5f64).is_err());
    }

    #[test]
    fn nulls_only_into_nullable() {
        assert_eq!(conv("Nullable(Int8)", Value::Null).expect("null"), Value::Null);
        assert_eq!(
            conv("LowCardinality(Nullable(String))", Value::Null).expect("null"),
            Value::Null
        );
        let err = conv("Int8", Value::Null).unwrap_err();
        assert!(err.to_string().contains("NULL is not allowed"), "{err}");
    }

    #[test]
    fn fixed_string_padding() {
        assert_eq!(
            conv("FixedString(4)", "ab").expect("pad"),
            Value::String(b"ab\0\0".to_vec())
        );
        let err = conv("FixedString(2)", "abc").unwrap_err();
        assert!(err.to_string().contains("3 bytes"), "{err}");
    }

    #[test]
    fn decimals() {
        assert_eq!(
            conv("Decimal(9, 2)", "1.5").expect("string"),
            Value::Decimal(Decimal::from_i128(150, 2))
        );
        assert_eq!(
            conv("Decimal(9, 2)", 42i32).expect("int"),
            Value::Decimal(Decimal::from_i128(4200, 2))
        );
        assert_eq!(
            conv("Decimal(9, 2)", 0.125f64).expect("float rounds"),
            Value::Decimal(Decimal::from_i128(13, 2))
        );
        assert!(matches!(
            conv("Decimal(9, 2)", "10000000.00"),
            Err(ChError::Overflow { .. })
        ));
        assert!(matches!(conv("Decimal(9, 2)", "1.234"), Err(ChError::Overflow { .. })));
        assert_eq!(
            conv("Decimal(9, 2)", "9999999.99").expect("boundary"),
            Value::Decimal(Decimal::from_i128(999_999_999, 2))
        );
    }

    #[test]
    fn enums_by_name_or_number() {
        let expected = Value::Enum {
            name: "b".into(),
            value: 2,
        };
        assert_eq!(conv("Enum8('a' = 1, 'b' = 2)", "b").expect("name"), expected);
        assert_eq!(conv("Enum8('a' = 1, 'b' = 2)", 2i8).expect("number"), expected);
        assert!(conv("Enum8('a' = 1)", "zzz").unwrap_err().to_string().contains("unknown enum member"));
        assert!(conv("Enum8('a' = 1)", 3i8).unwrap_err().to_string().contains("unknown enum value"));
    }

    #[test]
    fn dates_and_times() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().expect("valid");
        assert_eq!(conv("Date", "1970-01-11").expect("date"), Value::Date(10));
        assert_eq!(conv("Date", Value::Timestamp(ts)).expect("date"), Value::Date(19_724));
        assert!(matches!(conv("Date", -1i32), Err(ChError::Overflow { .. })));
        assert_eq!(
            conv("DateTime", Value::Timestamp(ts)).expect("datetime"),
            Value::DateTime(1_704_164_645)
        );
        assert_eq!(
            conv("DateTime", "2024-01-02 03:04:05").expect("text"),
            Value::DateTime(1_704_164_645)
        );
        let precise = ts + chrono::Duration::milliseconds(250);
        assert_eq!(
            conv("DateTime64(3)", Value::Timestamp(precise)).expect("ticks"),
            Value::DateTime64(1_704_164_645_250)
        );
    }

    #[test]
    fn network_and_uuid() {
        assert_eq!(
            conv("IPv4", "10.0.0.1").expect("ipv4"),
            Value::IPv4(Ipv4Addr::new(10, 0, 0, 1))
        );
        assert_eq!(
            conv("IPv6", Ipv4Addr::new(1, 2, 3, 4)).expect("mapped"),
            Value::IPv6(Ipv4Addr::new(1, 2, 3, 4).to_ipv6_mapped())
        );
        let id = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";
        assert_eq!(
            conv("UUID", id).expect("uuid"),
            Value::Uuid(Uuid::parse_str(id).expect("valid"))
        );
        assert!(conv("UUID", "not-a-uuid").is_err());
    }

    #[test]
    fn containers_recurse() {
        let value = Value::Array(vec![Value::Tuple(vec![Value::Int64(1), Value::from("x")])]);
        assert_eq!(
            conv("Array(Tuple(UInt8, Nullable(String)))", value).expect("nested"),
            Value::Array(vec![Value::Tuple(vec![Value::UInt8(1), Value::from("x")])])
        );
        let err = conv("Tuple(UInt8, UInt8)", Value::Tuple(vec![Value::UInt8(1)])).unwrap_err();
        assert!(err.to_string().contains("1 elements"), "{err}");
        assert_eq!(
            conv("Map(String, UInt16)", Value::Map(vec![(Value::from("k"), Value::UInt8(7))]))
                .expect("map"),
            Value::Map(vec![(Value::from("k"), Value::UInt16(7))])
        );
    }
}
