//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  Event payloads carry decimal amounts: { "total": 100.50 }             │
//! │                                                                         │
//! │  Naive:  (100.50_f64 * 100.0) as i64  → usually 10050, sometimes 10049 │
//! │                                                                         │
//! │  OUR SOLUTION: parse the decimal TEXT, never multiply a float           │
//! │    "100.5"  → 100 * 100 + 50 = 10050 cents                             │
//! │    "0.30000000000000004" → rejected (not representable in cents)       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use vela_core::money::Money;
//!
//! let total = Money::parse_decimal("100.50").unwrap();
//! assert_eq!(total.cents(), 10050);
//! assert_eq!(total.to_string(), "100.50");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

/// Number of fractional digits stored.
const SCALE: u32 = 2;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: Allows negative values for refunds
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Serde as integer cents**: JSON decimals go through [`Money::from_json_number`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero money.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is negative.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity (line totals).
    ///
    /// Fails with `InvalidAmount` instead of wrapping when the product does
    /// not fit in i64 cents.
    pub fn multiply_quantity(&self, qty: i64) -> CoreResult<Money> {
        self.0
            .checked_mul(qty)
            .map(Money)
            .ok_or_else(|| CoreError::InvalidAmount {
                input: format!("{self} x {qty}"),
                reason: "amount too large".to_string(),
            })
    }

    /// Adds, failing instead of wrapping on overflow.
    pub fn checked_add(&self, other: Money) -> CoreResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| CoreError::InvalidAmount {
                input: format!("{self} + {other}"),
                reason: "amount too large".to_string(),
            })
    }

    /// Parses a plain decimal string ("100.5", "-3", "0.07").
    ///
    /// ## Rules
    /// - Optional leading `-`
    /// - At most two significant fractional digits (trailing zeros are fine)
    /// - No exponent, no thousands separators
    ///
    /// ## Example
    /// ```rust
    /// use vela_core::money::Money;
    ///
    /// assert_eq!(Money::parse_decimal("100.5").unwrap().cents(), 10050);
    /// assert_eq!(Money::parse_decimal("-0.07").unwrap().cents(), -7);
    /// assert!(Money::parse_decimal("1.005").is_err());
    /// ```
    pub fn parse_decimal(input: &str) -> CoreResult<Money> {
        let invalid = |reason: &str| CoreError::InvalidAmount {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };

        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected digits before the decimal point"));
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected digits after the decimal point"));
        }

        // Digits past the scale must be zeros
        let significant = frac.trim_end_matches('0');
        if significant.len() > SCALE as usize {
            return Err(invalid("more precision than cents"));
        }

        let mut minor: i64 = 0;
        for (i, digit) in frac.bytes().take(SCALE as usize).enumerate() {
            minor += i64::from(digit - b'0') * 10_i64.pow(SCALE - 1 - i as u32);
        }

        let major: i64 = whole.parse().map_err(|_| invalid("amount too large"))?;
        let cents = major
            .checked_mul(10_i64.pow(SCALE))
            .and_then(|c| c.checked_add(minor))
            .ok_or_else(|| invalid("amount too large"))?;

        Ok(Money(if negative { -cents } else { cents }))
    }

    /// Converts a JSON number to Money without float arithmetic.
    ///
    /// Integers are taken as whole units. Floats are converted through their
    /// shortest round-trip text (`100.5`), which is then parsed exactly.
    pub fn from_json_number(number: &serde_json::Number) -> CoreResult<Money> {
        if let Some(whole) = number.as_i64() {
            return whole
                .checked_mul(10_i64.pow(SCALE))
                .map(Money)
                .ok_or_else(|| CoreError::InvalidAmount {
                    input: number.to_string(),
                    reason: "amount too large".to_string(),
                });
        }
        Money::parse_decimal(&number.to_string())
    }

    /// Converts to a JSON number (for payloads built on the edge).
    ///
    /// Goes through the decimal text so `10050` becomes `100.5` exactly as
    /// serde_json would parse it back.
    pub fn to_json_number(&self) -> serde_json::Value {
        if self.0 % 100 == 0 {
            return serde_json::Value::from(self.0 / 100);
        }
        self.to_string()
            .parse::<serde_json::Number>()
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal with two fraction digits ("100.50", "-5.07").
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

// =============================================================================
// Serde Helper
// =============================================================================

/// Serde adapter for payload fields that carry a JSON decimal (`"total": 100.5`).
///
/// ```rust,ignore
/// #[serde(with = "crate::money::decimal")]
/// pub total: Money,
/// ```
pub mod decimal {
    use super::Money;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(money: &Money, serializer: S) -> Result<S::Ok, S::Error> {
        money.to_json_number().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Money, D::Error> {
        let number = serde_json::Number::deserialize(deserializer)?;
        Money::from_json_number(&number).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(Money::parse_decimal("100.50").unwrap().cents(), 10050);
        assert_eq!(Money::parse_decimal("100.5").unwrap().cents(), 10050);
        assert_eq!(Money::parse_decimal("7").unwrap().cents(), 700);
        assert_eq!(Money::parse_decimal("0.07").unwrap().cents(), 7);
        assert_eq!(Money::parse_decimal("-5.50").unwrap().cents(), -550);
        assert_eq!(Money::parse_decimal("2.500").unwrap().cents(), 250);
    }

    #[test]
    fn test_parse_decimal_rejects_garbage() {
        assert!(Money::parse_decimal("").is_err());
        assert!(Money::parse_decimal(".5").is_err());
        assert!(Money::parse_decimal("1e3").is_err());
        assert!(Money::parse_decimal("1.005").is_err());
        assert!(Money::parse_decimal("1,000.00").is_err());
        assert!(Money::parse_decimal("99999999999999999999").is_err());
    }

    #[test]
    fn test_from_json_number_float_is_exact() {
        let value: serde_json::Value = serde_json::from_str("100.50").unwrap();
        let number = value.as_number().unwrap();
        assert_eq!(Money::from_json_number(number).unwrap().cents(), 10050);

        let value: serde_json::Value = serde_json::from_str("19.99").unwrap();
        assert_eq!(
            Money::from_json_number(value.as_number().unwrap()).unwrap().cents(),
            1999
        );
    }

    #[test]
    fn test_from_json_number_integer() {
        let value = serde_json::json!(12);
        assert_eq!(
            Money::from_json_number(value.as_number().unwrap()).unwrap().cents(),
            1200
        );
    }

    #[test]
    fn test_from_json_number_rejects_float_noise() {
        let value = serde_json::json!(0.1 + 0.2);
        assert!(Money::from_json_number(value.as_number().unwrap()).is_err());
    }

    #[test]
    fn test_to_json_number_roundtrips_through_text() {
        let money = Money::from_cents(10050);
        let value = money.to_json_number();
        assert_eq!(value.to_string(), "100.5");
        assert_eq!(Money::from_json_number(value.as_number().unwrap()).unwrap(), money);
        assert_eq!(Money::from_cents(300).to_json_number(), serde_json::json!(3));
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(10050).to_string(), "100.50");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(250);
        assert_eq!((a + b).cents(), 1250);
        assert_eq!((a - b).cents(), 750);
        assert_eq!(b.multiply_quantity(4).unwrap().cents(), 1000);
        assert_eq!(a.checked_add(b).unwrap().cents(), 1250);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let price = Money::from_cents(i64::MAX / 2);
        assert!(matches!(
            price.multiply_quantity(3),
            Err(CoreError::InvalidAmount { .. })
        ));
        assert!(Money::from_cents(-100).multiply_quantity(i64::MAX).is_err());
        assert!(price.checked_add(price).unwrap().checked_add(price).is_err());
    }
}
