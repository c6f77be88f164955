//! Caller-supplied cell converters for the reader.
//!
//! A converter is registered per column before the first row is read. The
//! reader checks [`ColumnConverter::accepts`] against the column's wire type
//! at registration and then applies [`ColumnConverter::convert`] lazily to
//! every cell that is accessed.

use chwire_error::{ChError, Result};
use chwire_types::{ColumnType, Value};

/// Rewrites the decoded values of one column.
pub trait ColumnConverter: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Whether this converter can handle values of `ty`.
    fn accepts(&self, ty: &ColumnType) -> bool;

    fn convert(&self, value: Value) -> Result<Value>;

    /// Column type reported to the caller after conversion; `None` keeps the
    /// wire type.
    fn output_type(&self, _input: &ColumnType) -> Option<ColumnType> {
        None
    }
}

/// Replaces nulls with a fixed value and reports the column as not nullable.
#[derive(Debug, Clone)]
pub struct NullAsDefault {
    default: Value,
}

impl NullAsDefault {
    #[must_use]
    pub const fn new(default: Value) -> Self {
        Self { default }
    }
}

impl ColumnConverter for NullAsDefault {
    fn name(&self) -> &str {
        "null_as_default"
    }

    fn accepts(&self, ty: &ColumnType) -> bool {
        ty.accepts_null()
    }

    fn convert(&self, value: Value) -> Result<Value> {
        Ok(if value.is_null() { self.default.clone() } else { value })
    }

    fn output_type(&self, input: &ColumnType) -> Option<ColumnType> {
        match input {
            ColumnType::Nullable(inner) => Some((**inner).clone()),
            ColumnType::LowCardinality(inner) => {
                Some(ColumnType::low_cardinality(inner.non_nullable().clone()))
            }
            _ => None,
        }
    }
}

/// Turns enum members into their names as plain strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumAsString;

impl ColumnConverter for EnumAsString {
    fn name(&self) -> &str {
        "enum_as_string"
    }

    fn accepts(&self, ty: &ColumnType) -> bool {
        matches!(ty.non_nullable(), ColumnType::Enum8(_) | ColumnType::Enum16(_))
    }

    fn convert(&self, value: Value) -> Result<Value> {
        match value {
            Value::Enum { name, .. } => Ok(Value::String(name.into_bytes())),
            Value::Null => Ok(Value::Null),
            other => Err(ChError::codec(
                "Enum",
                format!("expected an enum member, got {}", other.kind_name()),
            )),
        }
    }

    fn output_type(&self, input: &ColumnType) -> Option<ColumnType> {
        Some(if input.is_nullable() {
            ColumnType::nullable(ColumnType::String)
        } else {
            ColumnType::String
        })
    }
}

/// Converter built from a type predicate and a closure.
pub struct FnConverter<P, F> {
    name: String,
    accepts: P,
    convert: F,
}

impl<P, F> FnConverter<P, F>
where
    P: Fn(&ColumnType) -> bool + Send + Sync,
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, accepts: P, convert: F) -> Self {
        Self {
            name: name.into(),
            accepts,
            convert,
        }
    }
}

impl<P, F> ColumnConverter for FnConverter<P, F>
where
    P: Fn(&ColumnType) -> bool + Send + Sync,
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, ty: &ColumnType) -> bool {
        (self.accepts)(ty)
    }

    fn convert(&self, value: Value) -> Result<Value> {
        (self.convert)(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chwire_types::parse_type;

    #[test]
    fn null_as_default_strips_nullability() {
        let converter = NullAsDefault::new(Value::Int32(-1));
        let nullable = parse_type("Nullable(Int32)").expect("type");
        assert!(converter.accepts(&nullable));
        assert!(!converter.accepts(&ColumnType::Int32));
        assert_eq!(converter.output_type(&nullable), Some(ColumnType::Int32));
        let lc = parse_type("LowCardinality(Nullable(String))").expect("type");
        assert_eq!(
            converter.output_type(&lc),
            Some(parse_type("LowCardinality(String)").expect("type"))
        );
        assert_eq!(converter.convert(Value::Null).expect("null"), Value::Int32(-1));
        assert_eq!(converter.convert(Value::Int32(5)).expect("value"), Value::Int32(5));
    }

    #[test]
    fn enum_as_string() {
        let ty = parse_type("Enum8('a' = 1, 'b' = 2)").expect("type");
        assert!(EnumAsString.accepts(&ty));
        assert!(!EnumAsString.accepts(&ColumnType::Int8));
        let value = Value::Enum {
            name: "b".to_owned(),
            value: 2,
        };
        assert_eq!(EnumAsString.convert(value).expect("convert"), Value::from("b"));
        assert!(EnumAsString.convert(Value::Int8(1)).is_err());
    }

    #[test]
    fn closure_converter() {
        let doubler = FnConverter::new(
            "double",
            |ty: &ColumnType| *ty == ColumnType::UInt32,
            |value| match value {
                Value::UInt32(v) => Ok(Value::UInt64(u64::from(v) * 2)),
                other => Ok(other),
            },
        );
        assert_eq!(doubler.name(), "double");
        assert!(doubler.accepts(&ColumnType::UInt32));
        assert_eq!(doubler.convert(Value::UInt32(21)).expect("convert"), Value::UInt64(42));
    }
}
