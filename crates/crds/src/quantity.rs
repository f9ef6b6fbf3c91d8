//! Kubernetes resource quantities
//!
//! Just enough of the quantity grammar to compare memory and disk sizes:
//! binary suffixes (`Ki`..`Ei`), decimal suffixes (`k`..`E`), decimal
//! exponents (`1e9`) and fractional mantissas (`1.5Gi`). Values are kept
//! as whole bytes, fractions of a byte are rounded up.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned for strings that are not a valid quantity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid quantity {input:?}: {reason}")]
pub struct QuantityError {
    input: String,
    reason: &'static str,
}

impl QuantityError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// A parsed quantity, ordered by its byte value.
#[derive(Debug, Clone)]
pub struct Quantity {
    raw: String,
    bytes: u128,
}

impl Quantity {
    /// Parses a quantity string.
    ///
    /// # Errors
    ///
    /// Returns [`QuantityError`] for empty input, a malformed number, an
    /// unknown suffix or a negative value.
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(QuantityError::new(input, "empty"));
        }
        if trimmed.starts_with('-') {
            return Err(QuantityError::new(input, "negative"));
        }

        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+'))
            .unwrap_or(trimmed.len());
        let (number, suffix) = trimmed.split_at(split);
        let number = number.trim_start_matches('+');

        let (numerator, denominator) = parse_decimal(number)
            .ok_or_else(|| QuantityError::new(input, "malformed number"))?;
        let (mult_num, mult_den) = suffix_multiplier(suffix)
            .ok_or_else(|| QuantityError::new(input, "unknown suffix"))?;

        let scaled = numerator
            .checked_mul(mult_num)
            .ok_or_else(|| QuantityError::new(input, "overflow"))?;
        let divisor = denominator
            .checked_mul(mult_den)
            .ok_or_else(|| QuantityError::new(input, "overflow"))?;

        Ok(Self {
            raw: trimmed.to_string(),
            bytes: scaled.div_ceil(divisor),
        })
    }

    /// Value in whole units (bytes for memory and storage).
    #[must_use]
    pub fn bytes(&self) -> u128 {
        self.bytes
    }

    /// The string as written by the user.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

/// "12.5" -> (125, 10)
fn parse_decimal(number: &str) -> Option<(u128, u128)> {
    if number.is_empty() {
        return None;
    }
    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let digits = format!("{int_part}{frac_part}");
    let numerator = digits.parse::<u128>().ok()?;
    let denominator = 10u128.checked_pow(u32::try_from(frac_part.len()).ok()?)?;
    Some((numerator, denominator))
}

/// Multiplier for a suffix as a fraction, so that milli-units stay exact.
fn suffix_multiplier(suffix: &str) -> Option<(u128, u128)> {
    let binary = |exp: u32| Some((1u128 << (10 * exp), 1));
    let decimal = |exp: u32| Some((10u128.pow(exp), 1));
    match suffix {
        "" => Some((1, 1)),
        "Ki" => binary(1),
        "Mi" => binary(2),
        "Gi" => binary(3),
        "Ti" => binary(4),
        "Pi" => binary(5),
        "Ei" => binary(6),
        "m" => Some((1, 1000)),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        s if s.starts_with(['e', 'E']) => {
            let exp = s[1..].parse::<u32>().ok()?;
            Some((10u128.checked_pow(exp)?, 1))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_suffixes() {
        assert_eq!(Quantity::parse("1Ki").unwrap().bytes(), 1024);
        assert_eq!(Quantity::parse("4Gi").unwrap().bytes(), 4 * 1024 * 1024 * 1024);
        assert_eq!(Quantity::parse("1.5Gi").unwrap().bytes(), 1536 * 1024 * 1024);
    }

    #[test]
    fn test_decimal_suffixes_and_exponent() {
        assert_eq!(Quantity::parse("1G").unwrap().bytes(), 1_000_000_000);
        assert_eq!(Quantity::parse("2e3").unwrap().bytes(), 2000);
        assert_eq!(Quantity::parse("512").unwrap().bytes(), 512);
    }

    #[test]
    fn test_ordering_across_suffixes() {
        let small = Quantity::parse("1024Mi").unwrap();
        let same = Quantity::parse("1Gi").unwrap();
        let bigger = Quantity::parse("40Gi").unwrap();
        assert_eq!(small, same);
        assert!(bigger > same);
        assert!(Quantity::parse("10Gi").unwrap() < Quantity::parse("20Gi").unwrap());
    }

    #[test]
    fn test_invalid_quantities() {
        assert!(Quantity::parse("").is_err());
        assert!(Quantity::parse("lots").is_err());
        assert!(Quantity::parse("10GB").is_err());
        assert!(Quantity::parse("-1Gi").is_err());
        assert!(Quantity::parse(".").is_err());
    }
}
