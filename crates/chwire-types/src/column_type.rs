//! Column type descriptors.
//!
//! A [`ColumnType`] is a closed enumeration of every base type the engine
//! speaks, with nested descriptors boxed inside container variants. Codec
//! dispatch is a `match` over this enum.
//!
//! Descriptors are immutable once built. Equality is structural: two
//! descriptors are equal when their base name, nested descriptors and
//! literal arguments are equal in order. The canonical text produced by
//! [`ColumnType::complex_type_name`] parses back to an equal tree.

use std::fmt::{self, Write as _};

use crate::decimal::{Decimal, MAX_DECIMAL_PRECISION};
use crate::value::{U256, Value};

/// One element of a `Tuple`, optionally named.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleElement {
    pub name: Option<String>,
    pub ty: ColumnType,
}

impl TupleElement {
    #[must_use]
    pub const fn unnamed(ty: ColumnType) -> Self {
        Self { name: None, ty }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: Some(name.into()),
            ty,
        }
    }
}

/// Literal (non-type) argument of a descriptor, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeLiteral {
    Int(i64),
    Str(String),
    EnumPair(String, i64),
}

/// Parsed column type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Nothing,
    Bool,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    UInt256,
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Int256,
    Float32,
    Float64,
    String,
    FixedString(usize),
    Date,
    Date32,
    DateTime {
        timezone: Option<String>,
    },
    DateTime64 {
        scale: u8,
        timezone: Option<String>,
    },
    Uuid,
    IPv4,
    IPv6,
    /// `Decimal(P, S)`; the `Decimal32/64/128/256(S)` aliases normalize here.
    Decimal {
        precision: u8,
        scale: u8,
    },
    Enum8(Vec<(String, i8)>),
    Enum16(Vec<(String, i16)>),
    Nullable(Box<ColumnType>),
    LowCardinality(Box<ColumnType>),
    Array(Box<ColumnType>),
    Tuple(Vec<TupleElement>),
    Map(Box<ColumnType>, Box<ColumnType>),
}

impl ColumnType {
    #[must_use]
    pub fn nullable(inner: Self) -> Self {
        Self::Nullable(Box::new(inner))
    }

    #[must_use]
    pub fn array(inner: Self) -> Self {
        Self::Array(Box::new(inner))
    }

    #[must_use]
    pub fn low_cardinality(inner: Self) -> Self {
        Self::LowCardinality(Box::new(inner))
    }

    #[must_use]
    pub fn map(key: Self, value: Self) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    #[must_use]
    pub fn tuple(elements: impl IntoIterator<Item = Self>) -> Self {
        Self::Tuple(elements.into_iter().map(TupleElement::unnamed).collect())
    }

    /// Base type name without arguments (`Decimal`, `Array`, `Enum8`, ...).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Nothing => "Nothing",
            Self::Bool => "Bool",
            Self::UInt8 => "UInt8",
            Self::UInt16 => "UInt16",
            Self::UInt32 => "UInt32",
            Self::UInt64 => "UInt64",
            Self::UInt128 => "UInt128",
            Self::UInt256 => "UInt256",
            Self::Int8 => "Int8",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Int128 => "Int128",
            Self::Int256 => "Int256",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
            Self::String => "String",
            Self::FixedString(_) => "FixedString",
            Self::Date => "Date",
            Self::Date32 => "Date32",
            Self::DateTime { .. } => "DateTime",
            Self::DateTime64 { .. } => "DateTime64",
            Self::Uuid => "UUID",
            Self::IPv4 => "IPv4",
            Self::IPv6 => "IPv6",
            Self::Decimal { .. } => "Decimal",
            Self::Enum8(_) => "Enum8",
            Self::Enum16(_) => "Enum16",
            Self::Nullable(_) => "Nullable",
            Self::LowCardinality(_) => "LowCardinality",
            Self::Array(_) => "Array",
            Self::Tuple(_) => "Tuple",
            Self::Map(..) => "Map",
        }
    }

    /// Nested descriptors in declaration order.
    #[must_use]
    pub fn generic_arguments(&self) -> Vec<&Self> {
        match self {
            Self::Nullable(inner) | Self::LowCardinality(inner) | Self::Array(inner) => {
                vec![inner.as_ref()]
            }
            Self::Tuple(elements) => elements.iter().map(|e| &e.ty).collect(),
            Self::Map(key, value) => vec![key.as_ref(), value.as_ref()],
            _ => Vec::new(),
        }
    }

    /// Literal arguments in declaration order.
    #[must_use]
    pub fn literal_arguments(&self) -> Vec<TypeLiteral> {
        match self {
            Self::FixedString(n) => vec![TypeLiteral::Int(i64::try_from(*n).unwrap_or(i64::MAX))],
            Self::DateTime { timezone } => timezone
                .iter()
                .map(|tz| TypeLiteral::Str(tz.clone()))
                .collect(),
            Self::DateTime64 { scale, timezone } => std::iter::once(TypeLiteral::Int(i64::from(*scale)))
                .chain(timezone.iter().map(|tz| TypeLiteral::Str(tz.clone())))
                .collect(),
            Self::Decimal { precision, scale } => vec![
                TypeLiteral::Int(i64::from(*precision)),
                TypeLiteral::Int(i64::from(*scale)),
            ],
            Self::Enum8(members) => members
                .iter()
                .map(|(n, v)| TypeLiteral::EnumPair(n.clone(), i64::from(*v)))
                .collect(),
            Self::Enum16(members) => members
                .iter()
                .map(|(n, v)| TypeLiteral::EnumPair(n.clone(), i64::from(*v)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Canonical textual form, as the server prints it.
    #[must_use]
    pub fn complex_type_name(&self) -> String {
        self.to_string()
    }

    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable(_))
    }

    /// Strip one `Nullable` wrapper, if present.
    #[must_use]
    pub fn non_nullable(&self) -> &Self {
        match self {
            Self::Nullable(inner) => inner,
            other => other,
        }
    }

    /// Whether a null value can be stored (directly or through LowCardinality).
    #[must_use]
    pub fn accepts_null(&self) -> bool {
        match self {
            Self::Nullable(_) | Self::Nothing => true,
            Self::LowCardinality(inner) => inner.is_nullable(),
            _ => false,
        }
    }

    /// Bytes per row for fixed-width layouts, `None` for variable layouts.
    #[must_use]
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Self::Nothing | Self::Bool | Self::UInt8 | Self::Int8 | Self::Enum8(_) => Some(1),
            Self::UInt16 | Self::Int16 | Self::Date | Self::Enum16(_) => Some(2),
            Self::UInt32
            | Self::Int32
            | Self::Float32
            | Self::Date32
            | Self::DateTime { .. }
            | Self::IPv4 => Some(4),
            Self::UInt64 | Self::Int64 | Self::Float64 | Self::DateTime64 { .. } => Some(8),
            Self::UInt128 | Self::Int128 | Self::Uuid | Self::IPv6 => Some(16),
            Self::UInt256 | Self::Int256 => Some(32),
            Self::FixedString(n) => Some(*n),
            Self::Decimal { precision, .. } => Some(decimal_width(*precision)),
            _ => None,
        }
    }

    /// Value stored for rows that carry no explicit value (null payloads,
    /// sparse defaults).
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            Self::Nothing | Self::Nullable(_) => Value::Null,
            Self::Bool => Value::Bool(false),
            Self::UInt8 => Value::UInt8(0),
            Self::UInt16 => Value::UInt16(0),
            Self::UInt32 => Value::UInt32(0),
            Self::UInt64 => Value::UInt64(0),
            Self::UInt128 => Value::UInt128(0),
            Self::UInt256 => Value::UInt256(U256::ZERO),
            Self::Int8 => Value::Int8(0),
            Self::Int16 => Value::Int16(0),
            Self::Int32 => Value::Int32(0),
            Self::Int64 => Value::Int64(0),
            Self::Int128 => Value::Int128(0),
            Self::Int256 => Value::Int256(arrow_buffer::i256::ZERO),
            Self::Float32 => Value::Float32(0.0),
            Self::Float64 => Value::Float64(0.0),
            Self::String => Value::String(Vec::new()),
            Self::FixedString(n) => Value::String(vec![0; *n]),
            Self::Date => Value::Date(0),
            Self::Date32 => Value::Date32(0),
            Self::DateTime { .. } => Value::DateTime(0),
            Self::DateTime64 { .. } => Value::DateTime64(0),
            Self::Uuid => Value::Uuid(uuid::Uuid::nil()),
            Self::IPv4 => Value::IPv4(std::net::Ipv4Addr::UNSPECIFIED),
            Self::IPv6 => Value::IPv6(std::net::Ipv6Addr::UNSPECIFIED),
            Self::Decimal { scale, .. } => Value::Decimal(Decimal::from_i128(0, *scale)),
            Self::Enum8(members) => members.first().map_or(Value::Int8(0), |(n, v)| Value::Enum {
                name: n.clone(),
                value: i16::from(*v),
            }),
            Self::Enum16(members) => members.first().map_or(Value::Int16(0), |(n, v)| Value::Enum {
                name: n.clone(),
                value: *v,
            }),
            Self::LowCardinality(inner) => inner.default_value(),
            Self::Array(_) => Value::Array(Vec::new()),
            Self::Tuple(elements) => {
                Value::Tuple(elements.iter().map(|e| e.ty.default_value()).collect())
            }
            Self::Map(..) => Value::Map(Vec::new()),
        }
    }

    /// Whether `self` may appear inside `LowCardinality(...)`.
    #[must_use]
    pub fn is_low_cardinality_compatible(&self) -> bool {
        match self {
            Self::Nullable(inner) => inner.is_low_cardinality_compatible(),
            Self::String
            | Self::FixedString(_)
            | Self::Bool
            | Self::UInt8
            | Self::UInt16
            | Self::UInt32
            | Self::UInt64
            | Self::UInt128
            | Self::UInt256
            | Self::Int8
            | Self::Int16
            | Self::Int32
            | Self::Int64
            | Self::Int128
            | Self::Int256
            | Self::Float32
            | Self::Float64
            | Self::Date
            | Self::Date32
            | Self::DateTime { .. }
            | Self::Uuid
            | Self::IPv4
            | Self::IPv6 => true,
            _ => false,
        }
    }

    /// Whether `self` may appear inside `Nullable(...)`.
    #[must_use]
    pub const fn is_nullable_compatible(&self) -> bool {
        !matches!(
            self,
            Self::Nullable(_) | Self::LowCardinality(_) | Self::Array(_) | Self::Tuple(_) | Self::Map(..)
        )
    }

    /// Member value for an enum name.
    #[must_use]
    pub fn enum_value_of(&self, name: &str) -> Option<i16> {
        match self {
            Self::Enum8(members) => members
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| i16::from(*v)),
            Self::Enum16(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| *v),
            _ => None,
        }
    }

    /// Member name for an enum value.
    #[must_use]
    pub fn enum_name_of(&self, value: i16) -> Option<&str> {
        match self {
            Self::Enum8(members) => members
                .iter()
                .find(|(_, v)| i16::from(*v) == value)
                .map(|(n, _)| n.as_str()),
            Self::Enum16(members) => members
                .iter()
                .find(|(_, v)| *v == value)
                .map(|(n, _)| n.as_str()),
            _ => None,
        }
    }
}

/// Storage width in bytes for a decimal of the given precision.
#[must_use]
pub const fn decimal_width(precision: u8) -> usize {
    match precision {
        0..=9 => 4,
        10..=18 => 8,
        19..=38 => 16,
        _ => 32,
    }
}

/// Precision implied by a `DecimalNN` alias.
#[must_use]
pub const fn decimal_alias_precision(bits: u16) -> Option<u8> {
    match bits {
        32 => Some(9),
        64 => Some(18),
        128 => Some(38),
        256 => Some(MAX_DECIMAL_PRECISION),
        _ => None,
    }
}

/// Quote a string literal for type text.
pub(crate) fn quote_literal(out: &mut String, s: &str) {
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
}

fn write_enum<V: fmt::Display>(f: &mut fmt::Formatter<'_>, name: &str, members: &[(String, V)]) -> fmt::Result {
    let mut out = String::new();
    out.push_str(name);
    out.push('(');
    for (i, (member, value)) in members.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        quote_literal(&mut out, member);
        let _ = write!(out, " = {value}");
    }
    out.push(')');
    f.write_str(&out)
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedString(n) => write!(f, "FixedString({n})"),
            Self::DateTime { timezone: None } => f.write_str("DateTime"),
            Self::DateTime {
                timezone: Some(tz),
            } => {
                let mut quoted = String::new();
                quote_literal(&mut quoted, tz);
                write!(f, "DateTime({quoted})")
            }
            Self::DateTime64 { scale, timezone } => match timezone {
                None => write!(f, "DateTime64({scale})"),
                Some(tz) => {
                    let mut quoted = String::new();
                    quote_literal(&mut quoted, tz);
                    write!(f, "DateTime64({scale}, {quoted})")
                }
            },
            Self::Decimal { precision, scale } => write!(f, "Decimal({precision}, {scale})"),
            Self::Enum8(members) => write_enum(f, "Enum8", members),
            Self::Enum16(members) => write_enum(f, "Enum16", members),
            Self::Nullable(inner) => write!(f, "Nullable({inner})"),
            Self::LowCardinality(inner) => write!(f, "LowCardinality({inner})"),
            Self::Array(inner) => write!(f, "Array({inner})"),
            Self::Map(key, value) => write!(f, "Map({key}, {value})"),
            Self::Tuple(elements) => {
                f.write_str("Tuple(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if let Some(name) = &element.name {
                        write!(f, "{name} ")?;
                    }
                    write!(f, "{}", element.ty)?;
                }
                f.write_str(")")
            }
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names() {
        let cases = [
            (ColumnType::UInt8, "UInt8"),
            (ColumnType::Uuid, "UUID"),
            (ColumnType::FixedString(16), "FixedString(16)"),
            (
                ColumnType::DateTime {
                    timezone: Some("Europe/Moscow".into()),
                },
                "DateTime('Europe/Moscow')",
            ),
            (
                ColumnType::DateTime64 {
                    scale: 3,
                    timezone: None,
                },
                "DateTime64(3)",
            ),
            (
                ColumnType::Decimal {
                    precision: 18,
                    scale: 4,
                },
                "Decimal(18, 4)",
            ),
            (
                ColumnType::Enum8(vec![("a".into(), 1), ("it's".into(), -2)]),
                "Enum8('a' = 1, 'it\\'s' = -2)",
            ),
            (
                ColumnType::array(ColumnType::nullable(ColumnType::String)),
                "Array(Nullable(String))",
            ),
            (
                ColumnType::map(ColumnType::String, ColumnType::UInt64),
                "Map(String, UInt64)",
            ),
            (
                ColumnType::Tuple(vec![
                    TupleElement::named("a", ColumnType::UInt8),
                    TupleElement::named("b", ColumnType::String),
                ]),
                "Tuple(a UInt8, b String)",
            ),
        ];
        for (ty, expected) in cases {
            assert_eq!(ty.complex_type_name(), expected);
        }
    }

    #[test]
    fn fixed_widths() {
        assert_eq!(ColumnType::Int256.fixed_width(), Some(32));
        assert_eq!(ColumnType::Uuid.fixed_width(), Some(16));
        assert_eq!(
            ColumnType::Decimal {
                precision: 9,
                scale: 2
            }
            .fixed_width(),
            Some(4)
        );
        assert_eq!(
            ColumnType::Decimal {
                precision: 39,
                scale: 2
            }
            .fixed_width(),
            Some(32)
        );
        assert_eq!(ColumnType::String.fixed_width(), None);
        assert_eq!(ColumnType::array(ColumnType::UInt8).fixed_width(), None);
    }

    #[test]
    fn structure_accessors() {
        let ty = ColumnType::map(ColumnType::String, ColumnType::array(ColumnType::Int32));
        assert_eq!(ty.name(), "Map");
        assert_eq!(ty.generic_arguments().len(), 2);
        assert!(ty.literal_arguments().is_empty());

        let dec = ColumnType::Decimal {
            precision: 10,
            scale: 3,
        };
        assert_eq!(
            dec.literal_arguments(),
            vec![TypeLiteral::Int(10), TypeLiteral::Int(3)]
        );
        assert!(dec.generic_arguments().is_empty());
    }

    #[test]
    fn defaults() {
        assert_eq!(ColumnType::nullable(ColumnType::Int8).default_value(), Value::Null);
        assert_eq!(ColumnType::FixedString(3).default_value(), Value::String(vec![0, 0, 0]));
        assert_eq!(
            ColumnType::tuple([ColumnType::UInt8, ColumnType::String]).default_value(),
            Value::Tuple(vec![Value::UInt8(0), Value::String(Vec::new())])
        );
        assert_eq!(
            ColumnType::Enum8(vec![("x".into(), 5)]).default_value(),
            Value::Enum {
                name: "x".into(),
                value: 5
            }
        );
    }

    #[test]
    fn compatibility_rules() {
        assert!(ColumnType::String.is_low_cardinality_compatible());
        assert!(ColumnType::nullable(ColumnType::String).is_low_cardinality_compatible());
        assert!(!ColumnType::array(ColumnType::String).is_low_cardinality_compatible());
        assert!(!ColumnType::array(ColumnType::UInt8).is_nullable_compatible());
        assert!(ColumnType::low_cardinality(ColumnType::nullable(ColumnType::String)).accepts_null());
        assert!(!ColumnType::low_cardinality(ColumnType::String).accepts_null());
    }

    #[test]
    fn enum_lookup() {
        let ty = ColumnType::Enum16(vec![("low".into(), -300), ("high".into(), 300)]);
        assert_eq!(ty.enum_value_of("high"), Some(300));
        assert_eq!(ty.enum_name_of(-300), Some("low"));
        assert_eq!(ty.enum_value_of("missing"), None);
    }
}
