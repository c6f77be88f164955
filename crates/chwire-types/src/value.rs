use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use arrow_buffer::i256;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::decimal::{Decimal, digit_string};

/// Unsigned 256-bit integer as 32 little-endian bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct U256([u8; 32]);

impl U256 {
    pub const ZERO: Self = Self([0; 32]);
    pub const MAX: Self = Self([0xff; 32]);

    #[must_use]
    pub const fn from_le_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Value as `u128` when the high half is zero.
    #[must_use]
    pub fn to_u128(self) -> Option<u128> {
        if self.0[16..].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[..16]);
        Some(u128::from_le_bytes(low))
    }

    fn limbs(self) -> [u64; 4] {
        let mut limbs = [0u64; 4];
        for (i, chunk) in self.0.chunks_exact(8).enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            limbs[i] = u64::from_le_bytes(word);
        }
        limbs
    }
}

impl From<u128> for U256 {
    fn from(v: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(&v.to_le_bytes());
        Self(bytes)
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut limbs = self.limbs();
        if limbs.iter().all(|l| *l == 0) {
            return f.write_str("0");
        }
        let mut digits = Vec::new();
        while limbs.iter().any(|l| *l != 0) {
            // Long division of the 256-bit value by 10, most significant limb first.
            let mut rem = 0u128;
            for limb in limbs.iter_mut().rev() {
                let cur = (rem << 64) | u128::from(*limb);
                #[allow(clippy::cast_possible_truncation)]
                {
                    *limb = (cur / 10) as u64;
                    rem = cur % 10;
                }
            }
            #[allow(clippy::cast_possible_truncation)]
            digits.push(b'0' + rem as u8);
        }
        digits.reverse();
        f.write_str(&String::from_utf8_lossy(&digits))
    }
}

/// Application-level value exchanged with column codecs.
///
/// Decoding produces exactly one variant per column type (see
/// [`crate::ColumnType::default_value`] for the mapping). Encoding accepts a
/// wider set through the codec's value conversion, e.g. integers for enum
/// columns or [`Value::Timestamp`] for date columns.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    UInt128(u128),
    UInt256(U256),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Int128(i128),
    Int256(i256),
    Float32(f32),
    Float64(f64),
    /// `String` and `FixedString` payloads; arbitrary bytes.
    String(Vec<u8>),
    /// Days since 1970-01-01.
    Date(u16),
    /// Days since 1970-01-01, signed.
    Date32(i32),
    /// Seconds since the Unix epoch.
    DateTime(u32),
    /// Ticks of `10^-scale` seconds since the Unix epoch.
    DateTime64(i64),
    Uuid(Uuid),
    IPv4(Ipv4Addr),
    IPv6(Ipv6Addr),
    Decimal(Decimal),
    Enum {
        name: String,
        value: i16,
    },
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// Application-side instant; converted to the column's unit on write.
    Timestamp(DateTime<Utc>),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short label used in conversion errors.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::UInt8(_) => "UInt8",
            Self::UInt16(_) => "UInt16",
            Self::UInt32(_) => "UInt32",
            Self::UInt64(_) => "UInt64",
            Self::UInt128(_) => "UInt128",
            Self::UInt256(_) => "UInt256",
            Self::Int8(_) => "Int8",
            Self::Int16(_) => "Int16",
            Self::Int32(_) => "Int32",
            Self::Int64(_) => "Int64",
            Self::Int128(_) => "Int128",
            Self::Int256(_) => "Int256",
            Self::Float32(_) => "Float32",
            Self::Float64(_) => "Float64",
            Self::String(_) => "String",
            Self::Date(_) => "Date",
            Self::Date32(_) => "Date32",
            Self::DateTime(_) => "DateTime",
            Self::DateTime64(_) => "DateTime64",
            Self::Uuid(_) => "UUID",
            Self::IPv4(_) => "IPv4",
            Self::IPv6(_) => "IPv6",
            Self::Decimal(_) => "Decimal",
            Self::Enum { .. } => "Enum",
            Self::Array(_) => "Array",
            Self::Tuple(_) => "Tuple",
            Self::Map(_) => "Map",
            Self::Timestamp(_) => "Timestamp",
        }
    }

    /// UTF-8 view of a string payload.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(bytes) => std::str::from_utf8(bytes).ok(),
            Self::Enum { name, .. } => Some(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Any integer variant widened to `i128`, if it fits.
    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Bool(b) => Some(i128::from(*b)),
            Self::UInt8(v) => Some(i128::from(*v)),
            Self::UInt16(v) | Self::Date(v) => Some(i128::from(*v)),
            Self::UInt32(v) | Self::DateTime(v) => Some(i128::from(*v)),
            Self::UInt64(v) => Some(i128::from(*v)),
            Self::UInt128(v) => i128::try_from(*v).ok(),
            Self::UInt256(v) => v.to_u128().and_then(|v| i128::try_from(v).ok()),
            Self::Int8(v) => Some(i128::from(*v)),
            Self::Int16(v) => Some(i128::from(*v)),
            Self::Int32(v) | Self::Date32(v) => Some(i128::from(*v)),
            Self::Int64(v) | Self::DateTime64(v) => Some(i128::from(*v)),
            Self::Int128(v) => Some(*v),
            Self::Int256(v) => v.to_i128(),
            Self::Enum { value, .. } => Some(i128::from(*value)),
            _ => None,
        }
    }

    /// Calendar date for `Date`/`Date32` values.
    #[must_use]
    pub fn as_naive_date(&self) -> Option<NaiveDate> {
        let days = match self {
            Self::Date(d) => i64::from(*d),
            Self::Date32(d) => i64::from(*d),
            _ => return None,
        };
        NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::Duration::days(days))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::UInt8(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::UInt128(v) => write!(f, "{v}"),
            Self::UInt256(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) | Self::Date32(v) => write!(f, "{v}"),
            Self::Int64(v) | Self::DateTime64(v) => write!(f, "{v}"),
            Self::Int128(v) => write!(f, "{v}"),
            Self::Int256(v) => {
                if *v < i256::ZERO {
                    f.write_str("-")?;
                }
                f.write_str(&digit_string(*v))
            }
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::String(bytes) => write!(f, "'{}'", String::from_utf8_lossy(bytes)),
            Self::Date(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{v}"),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::IPv4(v) => write!(f, "{v}"),
            Self::IPv6(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Enum { name, .. } => write!(f, "'{name}'"),
            Self::Array(items) | Self::Tuple(items) => {
                let (open, close) = if matches!(self, Self::Array(_)) {
                    ("[", "]")
                } else {
                    ("(", ")")
                };
                f.write_str(open)?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(close)
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

value_from!(
    bool => Bool,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    u128 => UInt128,
    U256 => UInt256,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    i128 => Int128,
    i256 => Int256,
    f32 => Float32,
    f64 => Float64,
    Vec<u8> => String,
    Uuid => Uuid,
    Ipv4Addr => IPv4,
    Ipv6Addr => IPv6,
    Decimal => Decimal,
    DateTime<Utc> => Timestamp,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v.into_bytes())
    }
}

impl From<NaiveDate> for Value {
    fn from(date: NaiveDate) -> Self {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
        let days = date.signed_duration_since(epoch).num_days();
        Self::Date32(i32::try_from(days).unwrap_or(if days < 0 { i32::MIN } else { i32::MAX }))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value
where
    T: NotBytes,
{
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Marker keeping `Vec<u8>` mapped to `String` rather than `Array(UInt8)`.
pub trait NotBytes {}

macro_rules! not_bytes {
    ($($ty:ty),*) => { $(impl NotBytes for $ty {})* };
}

not_bytes!(
    bool, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64, String, Value, Decimal, Uuid
);
impl NotBytes for &str {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u256_display() {
        assert_eq!(U256::ZERO.to_string(), "0");
        assert_eq!(U256::from(12_345u128).to_string(), "12345");
        assert_eq!(
            U256::MAX.to_string(),
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
        assert_eq!(U256::from(u128::MAX).to_u128(), Some(u128::MAX));
        assert_eq!(U256::MAX.to_u128(), None);
    }

    #[test]
    fn conversions_from_rust_types() {
        assert_eq!(Value::from("x"), Value::String(b"x".to_vec()));
        assert_eq!(Value::from(Some(5u8)), Value::UInt8(5));
        assert_eq!(Value::from(None::<u8>), Value::Null);
        assert_eq!(
            Value::from(vec![1i32, 2]),
            Value::Array(vec![Value::Int32(1), Value::Int32(2)])
        );
        assert_eq!(Value::from(vec![1u8, 2]), Value::String(vec![1, 2]));
    }

    #[test]
    fn naive_date_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).expect("valid date");
        let value = Value::from(date);
        assert_eq!(value, Value::Date32(19_782));
        assert_eq!(value.as_naive_date(), Some(date));

        let before_epoch = NaiveDate::from_ymd_opt(1969, 12, 31).expect("valid date");
        assert_eq!(Value::from(before_epoch), Value::Date32(-1));
    }

    #[test]
    fn display_nested() {
        let v = Value::Array(vec![
            Value::Tuple(vec![Value::from("a"), Value::Null]),
            Value::Map(vec![(Value::UInt8(1), Value::Int256(i256::from_i128(-7)))]),
        ]);
        assert_eq!(v.to_string(), "[('a', NULL), {1: -7}]");
    }

    #[test]
    fn integer_widening() {
        assert_eq!(Value::UInt64(u64::MAX).as_i128(), Some(i128::from(u64::MAX)));
        assert_eq!(Value::UInt128(u128::MAX).as_i128(), None);
        assert_eq!(Value::Float64(1.0).as_i128(), None);
    }
}
