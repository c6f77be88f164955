//! Exact decimal values backed by a 256-bit mantissa.
//!
//! Every `Decimal*` column stores `mantissa = value * 10^scale` as a signed
//! integer whose width follows the precision (4, 8, 16 or 32 bytes). The
//! in-memory form always uses `i256` so one type covers all widths.

use std::fmt;
use std::str::FromStr;

use arrow_buffer::i256;
use chwire_error::{ChError, Result};

/// Largest supported decimal precision (`Decimal256`).
pub const MAX_DECIMAL_PRECISION: u8 = 76;

const TEN: i256 = i256::from_i128(10);

/// A decimal value: `mantissa / 10^scale`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Decimal {
    mantissa: i256,
    scale: u8,
}

impl Decimal {
    #[must_use]
    pub const fn new(mantissa: i256, scale: u8) -> Self {
        Self { mantissa, scale }
    }

    #[must_use]
    pub const fn from_i128(mantissa: i128, scale: u8) -> Self {
        Self {
            mantissa: i256::from_i128(mantissa),
            scale,
        }
    }

    #[must_use]
    pub const fn mantissa(self) -> i256 {
        self.mantissa
    }

    #[must_use]
    pub const fn scale(self) -> u8 {
        self.scale
    }

    /// Number of significant decimal digits in the mantissa (at least 1).
    #[must_use]
    pub fn digits(self) -> u8 {
        digit_count(self.mantissa)
    }

    /// Whether the mantissa fits in `precision` digits.
    #[must_use]
    pub fn fits_precision(self, precision: u8) -> bool {
        self.mantissa == i256::ZERO || self.digits() <= precision
    }

    /// Rescale to `scale`, failing if digits would be dropped or the
    /// mantissa overflows.
    pub fn rescale(self, scale: u8) -> Result<Self> {
        if scale == self.scale {
            return Ok(self);
        }
        if scale > self.scale {
            let factor = pow10(scale - self.scale)
                .ok_or_else(|| ChError::overflow(format!("Decimal(_, {scale})"), self))?;
            let mantissa = self
                .mantissa
                .checked_mul(factor)
                .ok_or_else(|| ChError::overflow(format!("Decimal(_, {scale})"), self))?;
            return Ok(Self { mantissa, scale });
        }
        let factor = pow10(self.scale - scale)
            .ok_or_else(|| ChError::internal("decimal scale out of range"))?;
        if self.mantissa.wrapping_rem(factor) != i256::ZERO {
            return Err(ChError::overflow(format!("Decimal(_, {scale})"), self));
        }
        Ok(Self {
            mantissa: self.mantissa.wrapping_div(factor),
            scale,
        })
    }

    /// Like [`Self::rescale`], but drops digits rounding half away from zero.
    pub fn round_to(self, scale: u8) -> Result<Self> {
        if scale >= self.scale {
            return self.rescale(scale);
        }
        let factor = pow10(self.scale - scale)
            .ok_or_else(|| ChError::internal("decimal scale out of range"))?;
        let half = factor.wrapping_div(i256::from_i128(2));
        let quotient = self.mantissa.wrapping_div(factor);
        let rem = self.mantissa.wrapping_rem(factor);
        let mantissa = if rem >= half {
            quotient.wrapping_add(i256::ONE)
        } else if rem <= half.wrapping_neg() {
            quotient.wrapping_sub(i256::ONE)
        } else {
            quotient
        };
        Ok(Self { mantissa, scale })
    }

    /// Parse decimal text (`-12.340`) at its natural scale.
    pub fn parse(text: &str) -> Result<Self> {
        let s = text.trim();
        let (negative, body) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        let bad = || ChError::codec("Decimal", format!("invalid decimal literal '{text}'"));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(bad());
        }
        let scale = u8::try_from(frac_part.len())
            .ok()
            .filter(|s| *s <= MAX_DECIMAL_PRECISION)
            .ok_or_else(bad)?;
        let mut mantissa = i256::ZERO;
        for ch in int_part.bytes().chain(frac_part.bytes()) {
            if !ch.is_ascii_digit() {
                return Err(bad());
            }
            let digit = i256::from_i128(i128::from(ch - b'0'));
            // Accumulate negatively so i256::MIN stays representable.
            mantissa = mantissa
                .checked_mul(TEN)
                .and_then(|m| m.checked_sub(digit))
                .ok_or_else(|| ChError::overflow("Decimal256", text))?;
        }
        if !negative {
            mantissa = mantissa
                .checked_neg()
                .ok_or_else(|| ChError::overflow("Decimal256", text))?;
        }
        Ok(Self { mantissa, scale })
    }
}

impl FromStr for Decimal {
    type Err = ChError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.mantissa < i256::ZERO;
        let digits = digit_string(self.mantissa);
        let scale = usize::from(self.scale);
        if negative {
            f.write_str("-")?;
        }
        if scale == 0 {
            return f.write_str(&digits);
        }
        if digits.len() <= scale {
            f.write_str("0.")?;
            for _ in digits.len()..scale {
                f.write_str("0")?;
            }
            return f.write_str(&digits);
        }
        let split = digits.len() - scale;
        f.write_str(&digits[..split])?;
        f.write_str(".")?;
        f.write_str(&digits[split..])
    }
}

/// `10^exp`, or `None` when it does not fit in `i256`.
#[must_use]
pub fn pow10(exp: u8) -> Option<i256> {
    let mut acc = i256::ONE;
    for _ in 0..exp {
        acc = acc.checked_mul(TEN)?;
    }
    Some(acc)
}

fn digit_count(value: i256) -> u8 {
    let mut count = 0u8;
    let mut current = value;
    while current != i256::ZERO {
        current = current.wrapping_div(TEN);
        count += 1;
    }
    count.max(1)
}

/// Absolute decimal digits of `value`; works for `i256::MIN` because the
/// remainder is negated per digit rather than negating the whole value.
pub(crate) fn digit_string(value: i256) -> String {
    if value == i256::ZERO {
        return "0".to_owned();
    }
    let mut buf = Vec::new();
    let mut current = value;
    while current != i256::ZERO {
        let rem = current.wrapping_rem(TEN).to_i128().unwrap_or(0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let digit = rem.unsigned_abs() as u8;
        buf.push(b'0' + digit);
        current = current.wrapping_div(TEN);
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}
