//! Recursive-descent parser for type descriptor text.
//!
//! Grammar (whitespace between tokens is insignificant):
//!
//! ```text
//! type    := Name [ '(' arg { ',' arg } ')' ]
//! arg     := type | Ident type | Integer | Quoted [ '=' Integer ]
//! Quoted  := '\'' { char | '\\' char } '\''
//! ```
//!
//! Parsing happens in two passes: the text is turned into a generic
//! [`TypeExpr`] tree, then each node is validated against the arity and
//! literal rules of its base name.

use chwire_error::{ChError, Result};
use memchr::memchr2;

use crate::column_type::{ColumnType, TupleElement, decimal_alias_precision};
use crate::decimal::MAX_DECIMAL_PRECISION;

/// Nesting deeper than this is rejected instead of risking stack exhaustion.
pub const MAX_TYPE_DEPTH: usize = 128;

/// Longest `FixedString` the server accepts.
pub const MAX_FIXED_STRING_LEN: i64 = 0xFF_FFFF;

/// Largest `DateTime64` scale.
pub const MAX_DATETIME64_SCALE: u8 = 9;

/// Parse a type descriptor.
pub fn parse_type(input: &str) -> Result<ColumnType> {
    let mut parser = Parser {
        input,
        bytes: input.as_bytes(),
        pos: 0,
    };
    let expr = parser.parse_expr(0)?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("unexpected trailing characters"));
    }
    build(input, &expr)
}

#[derive(Debug, Clone)]
struct TypeExpr {
    name: String,
    offset: usize,
    args: Option<Vec<Arg>>,
}

#[derive(Debug, Clone)]
enum Arg {
    Type(TypeExpr),
    Named(String, TypeExpr),
    Int(i64, usize),
    Str(String, usize),
    Pair(String, i64, usize),
}

impl Arg {
    const fn offset(&self) -> usize {
        match self {
            Self::Type(t) | Self::Named(_, t) => t.offset,
            Self::Int(_, o) | Self::Str(_, o) | Self::Pair(_, _, o) => *o,
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, detail: impl Into<String>) -> ChError {
        ChError::type_parse(self.input, self.pos, detail)
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, ch: u8) -> Result<()> {
        if self.peek() == Some(ch) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", char::from(ch))))
        }
    }

    fn ident(&mut self) -> Result<String> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric() || self.bytes[self.pos] == b'_')
        {
            self.pos += 1;
        }
        if start == self.pos || self.bytes[start].is_ascii_digit() {
            self.pos = start;
            return Err(self.error("expected a type name"));
        }
        Ok(self.input[start..self.pos].to_owned())
    }

    fn integer(&mut self) -> Result<i64> {
        self.skip_ws();
        let start = self.pos;
        if self.bytes.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        self.input[start..self.pos].parse().map_err(|_| {
            self.pos = start;
            self.error("expected an integer literal")
        })
    }

    fn quoted(&mut self) -> Result<String> {
        self.skip_ws();
        self.expect(b'\'')?;
        let mut out = Vec::new();
        loop {
            let rest = &self.bytes[self.pos..];
            let Some(idx) = memchr2(b'\'', b'\\', rest) else {
                return Err(self.error("unterminated string literal"));
            };
            out.extend_from_slice(&rest[..idx]);
            self.pos += idx;
            if self.bytes[self.pos] == b'\'' {
                self.pos += 1;
                break;
            }
            let Some(&escaped) = self.bytes.get(self.pos + 1) else {
                return Err(self.error("dangling escape in string literal"));
            };
            self.pos += 2;
            out.push(match escaped {
                b'n' => b'\n',
                b't' => b'\t',
                b'r' => b'\r',
                b'0' => 0,
                b'a' => 0x07,
                b'b' => 0x08,
                b'f' => 0x0c,
                b'v' => 0x0b,
                b'x' => self.hex_escape()?,
                // Quote, backslash, and anything else stand for themselves.
                other => other,
            });
        }
        String::from_utf8(out).map_err(|_| self.error("string literal is not UTF-8"))
    }

    /// Two hex digits after `\x`.
    fn hex_escape(&mut self) -> Result<u8> {
        let digits = self
            .input
            .get(self.pos..self.pos + 2)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        let Some(byte) = digits else {
            return Err(self.error("expected two hex digits after \\x"));
        };
        self.pos += 2;
        Ok(byte)
    }

    fn parse_expr(&mut self, depth: usize) -> Result<TypeExpr> {
        if depth > MAX_TYPE_DEPTH {
            return Err(self.error("type nesting too deep"));
        }
        self.skip_ws();
        let offset = self.pos;
        let name = self.ident()?;
        if self.peek() != Some(b'(') {
            return Ok(TypeExpr {
                name,
                offset,
                args: None,
            });
        }
        self.pos += 1;
        let mut args = Vec::new();
        if self.peek() == Some(b')') {
            self.pos += 1;
            return Ok(TypeExpr {
                name,
                offset,
                args: Some(args),
            });
        }
        loop {
            args.push(self.parse_arg(depth + 1)?);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => return Err(self.error("expected ',' or ')'")),
                None => return Err(self.error("unbalanced parentheses")),
            }
        }
        Ok(TypeExpr {
            name,
            offset,
            args: Some(args),
        })
    }

    fn parse_arg(&mut self, depth: usize) -> Result<Arg> {
        let offset = self.pos;
        match self.peek() {
            Some(b'\'') => {
                let text = self.quoted()?;
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    let value = self.integer()?;
                    Ok(Arg::Pair(text, value, offset))
                } else {
                    Ok(Arg::Str(text, offset))
                }
            }
            Some(c) if c == b'-' || c.is_ascii_digit() => Ok(Arg::Int(self.integer()?, offset)),
            Some(_) => {
                let first = self.parse_expr(depth)?;
                // `name Type` inside a named tuple.
                let next = self.peek();
                if first.args.is_none() && next.is_some_and(|c| c.is_ascii_alphabetic() || c == b'_') {
                    let ty = self.parse_expr(depth)?;
                    Ok(Arg::Named(first.name, ty))
                } else {
                    Ok(Arg::Type(first))
                }
            }
            None => Err(self.error("unexpected end of input")),
        }
    }
}

fn err_at(input: &str, offset: usize, detail: impl Into<String>) -> ChError {
    ChError::type_parse(input, offset, detail)
}

fn no_args(input: &str, expr: &TypeExpr, ty: ColumnType) -> Result<ColumnType> {
    match &expr.args {
        None => Ok(ty),
        Some(_) => Err(err_at(
            input,
            expr.offset,
            format!("{} takes no arguments", expr.name),
        )),
    }
}

fn args_exact<'e>(input: &str, expr: &'e TypeExpr, count: usize) -> Result<&'e [Arg]> {
    match &expr.args {
        Some(args) if args.len() == count => Ok(args),
        _ => Err(err_at(
            input,
            expr.offset,
            format!(
                "{} expects {count} argument{}",
                expr.name,
                if count == 1 { "" } else { "s" }
            ),
        )),
    }
}

fn type_arg(input: &str, arg: &Arg) -> Result<ColumnType> {
    match arg {
        Arg::Type(t) => build(input, t),
        _ => Err(err_at(input, arg.offset(), "expected a type argument")),
    }
}

fn int_arg(input: &str, arg: &Arg, min: i64, max: i64, what: &str) -> Result<i64> {
    match arg {
        Arg::Int(v, _) if (min..=max).contains(v) => Ok(*v),
        Arg::Int(v, offset) => Err(err_at(
            input,
            *offset,
            format!("{what} {v} outside {min}..={max}"),
        )),
        _ => Err(err_at(input, arg.offset(), format!("expected {what} literal"))),
    }
}

fn str_arg(input: &str, arg: &Arg) -> Result<String> {
    match arg {
        Arg::Str(s, _) => Ok(s.clone()),
        _ => Err(err_at(input, arg.offset(), "expected a quoted string")),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn build(input: &str, expr: &TypeExpr) -> Result<ColumnType> {
    let simple = match expr.name.as_str() {
        "Nothing" => Some(ColumnType::Nothing),
        "Bool" | "Boolean" => Some(ColumnType::Bool),
        "UInt8" => Some(ColumnType::UInt8),
        "UInt16" => Some(ColumnType::UInt16),
        "UInt32" => Some(ColumnType::UInt32),
        "UInt64" => Some(ColumnType::UInt64),
        "UInt128" => Some(ColumnType::UInt128),
        "UInt256" => Some(ColumnType::UInt256),
        "Int8" => Some(ColumnType::Int8),
        "Int16" => Some(ColumnType::Int16),
        "Int32" => Some(ColumnType::Int32),
        "Int64" => Some(ColumnType::Int64),
        "Int128" => Some(ColumnType::Int128),
        "Int256" => Some(ColumnType::Int256),
        "Float32" => Some(ColumnType::Float32),
        "Float64" => Some(ColumnType::Float64),
        "String" => Some(ColumnType::String),
        "Date" => Some(ColumnType::Date),
        "Date32" => Some(ColumnType::Date32),
        "UUID" => Some(ColumnType::Uuid),
        "IPv4" => Some(ColumnType::IPv4),
        "IPv6" => Some(ColumnType::IPv6),
        _ => None,
    };
    if let Some(ty) = simple {
        return no_args(input, expr, ty);
    }

    match expr.name.as_str() {
        "FixedString" => {
            let args = args_exact(input, expr, 1)?;
            let n = int_arg(input, &args[0], 1, MAX_FIXED_STRING_LEN, "length")?;
            Ok(ColumnType::FixedString(n as usize))
        }
        "DateTime" => match &expr.args {
            None => Ok(ColumnType::DateTime { timezone: None }),
            Some(args) if args.len() == 1 => Ok(ColumnType::DateTime {
                timezone: Some(str_arg(input, &args[0])?),
            }),
            Some(_) => Err(err_at(input, expr.offset, "DateTime expects at most 1 argument")),
        },
        "DateTime64" => {
            let args = match &expr.args {
                Some(args) if (1..=2).contains(&args.len()) => args,
                _ => {
                    return Err(err_at(
                        input,
                        expr.offset,
                        "DateTime64 expects a scale and an optional timezone",
                    ));
                }
            };
            let scale = int_arg(input, &args[0], 0, i64::from(MAX_DATETIME64_SCALE), "scale")?;
            let timezone = args.get(1).map(|a| str_arg(input, a)).transpose()?;
            Ok(ColumnType::DateTime64 {
                scale: scale as u8,
                timezone,
            })
        }
        "Decimal" => {
            let args = args_exact(input, expr, 2)?;
            let precision = int_arg(
                input,
                &args[0],
                1,
                i64::from(MAX_DECIMAL_PRECISION),
                "precision",
            )?;
            let scale = int_arg(input, &args[1], 0, precision, "scale")?;
            Ok(ColumnType::Decimal {
                precision: precision as u8,
                scale: scale as u8,
            })
        }
        "Decimal32" | "Decimal64" | "Decimal128" | "Decimal256" => {
            let bits: u16 = expr.name[7..].parse().unwrap_or(0);
            let precision = decimal_alias_precision(bits)
                .ok_or_else(|| err_at(input, expr.offset, "unknown decimal width"))?;
            let args = args_exact(input, expr, 1)?;
            let scale = int_arg(input, &args[0], 0, i64::from(precision), "scale")?;
            Ok(ColumnType::Decimal {
                precision,
                scale: scale as u8,
            })
        }
        "Enum8" => {
            let members = enum_members(input, expr, i64::from(i8::MIN), i64::from(i8::MAX))?;
            Ok(ColumnType::Enum8(
                members.into_iter().map(|(n, v)| (n, v as i8)).collect(),
            ))
        }
        "Enum16" => {
            let members = enum_members(input, expr, i64::from(i16::MIN), i64::from(i16::MAX))?;
            Ok(ColumnType::Enum16(
                members.into_iter().map(|(n, v)| (n, v as i16)).collect(),
            ))
        }
        "Nullable" => {
            let args = args_exact(input, expr, 1)?;
            let inner = type_arg(input, &args[0])?;
            if !inner.is_nullable_compatible() {
                return Err(err_at(
                    input,
                    args[0].offset(),
                    format!("Nullable cannot wrap {}", inner.name()),
                ));
            }
            Ok(ColumnType::nullable(inner))
        }
        "LowCardinality" => {
            let args = args_exact(input, expr, 1)?;
            let inner = type_arg(input, &args[0])?;
            if !inner.is_low_cardinality_compatible() {
                return Err(err_at(
                    input,
                    args[0].offset(),
                    format!("LowCardinality cannot wrap {inner}"),
                ));
            }
            Ok(ColumnType::low_cardinality(inner))
        }
        "Array" => {
            let args = args_exact(input, expr, 1)?;
            Ok(ColumnType::array(type_arg(input, &args[0])?))
        }
        "Map" => {
            let args = args_exact(input, expr, 2)?;
            let key = type_arg(input, &args[0])?;
            if matches!(
                key.non_nullable(),
                ColumnType::Array(_) | ColumnType::Tuple(_) | ColumnType::Map(..)
            ) || key.is_nullable()
            {
                return Err(err_at(
                    input,
                    args[0].offset(),
                    format!("{key} cannot be a map key"),
                ));
            }
            let value = type_arg(input, &args[1])?;
            Ok(ColumnType::map(key, value))
        }
        "Tuple" => {
            let args = match &expr.args {
                Some(args) if !args.is_empty() => args,
                _ => return Err(err_at(input, expr.offset, "Tuple expects at least 1 element")),
            };
            let named = matches!(args[0], Arg::Named(..));
            let mut elements = Vec::with_capacity(args.len());
            for arg in args {
                let element = match (arg, named) {
                    (Arg::Named(name, ty), true) => {
                        if elements.iter().any(|e: &TupleElement| e.name.as_deref() == Some(name)) {
                            return Err(err_at(
                                input,
                                arg.offset(),
                                format!("duplicate tuple element name '{name}'"),
                            ));
                        }
                        TupleElement::named(name.clone(), build(input, ty)?)
                    }
                    (Arg::Type(ty), false) => TupleElement::unnamed(build(input, ty)?),
                    (Arg::Named(..) | Arg::Type(_), _) => {
                        return Err(err_at(
                            input,
                            arg.offset(),
                            "tuple elements must be all named or all unnamed",
                        ));
                    }
                    _ => return Err(err_at(input, arg.offset(), "expected a type argument")),
                };
                elements.push(element);
            }
            Ok(ColumnType::Tuple(elements))
        }
        other => Err(err_at(input, expr.offset, format!("unknown type '{other}'"))),
    }
}

fn enum_members(input: &str, expr: &TypeExpr, min: i64, max: i64) -> Result<Vec<(String, i64)>> {
    let args = match &expr.args {
        Some(args) if !args.is_empty() => args,
        _ => {
            return Err(err_at(
                input,
                expr.offset,
                format!("{} expects at least 1 member", expr.name),
            ));
        }
    };
    let mut members: Vec<(String, i64)> = Vec::with_capacity(args.len());
    for arg in args {
        let Arg::Pair(name, value, offset) = arg else {
            return Err(err_at(input, arg.offset(), "expected 'name' = value"));
        };
        if !(min..=max).contains(value) {
            return Err(err_at(
                input,
                *offset,
                format!("enum value {value} outside {min}..={max}"),
            ));
        }
        if members.iter().any(|(n, v)| n == name || v == value) {
            return Err(err_at(
                input,
                *offset,
                format!("duplicate enum member '{name}' = {value}"),
            ));
        }
        members.push((name.clone(), *value));
    }
    Ok(members)
}
