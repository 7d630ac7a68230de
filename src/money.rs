//! Money Module
//!
//! Fixed-point amounts for the settlement ledger. Every monetary or quantity
//! value is a `rust_decimal::Decimal`, never a float, and every value that is
//! written to the ledger is quantized to its currency scale through this module.
//!
//! ## Scales
//! - Crypto amounts, prices and rates: 8 fractional digits (1 satoshi)
//! - Fiat cash (NGN, USD display): 2 fractional digits
//!
//! ## Rounding
//! Settlement never creates value: amounts credited to a user round toward
//! zero ([`round_down`]), amounts charged to a user (costs, fees) round away
//! from zero ([`round_up`]).
//!
//! ## Usage
//! ```rust
//! use settlement_engine::money::{parse_amount, round_down};
//! use rust_decimal::Decimal;
//!
//! // Client sends "1.5" BTC
//! let amount = parse_amount("1.5", 8).unwrap();
//! assert_eq!(amount, Decimal::new(15, 1));
//!
//! let credited = round_down(Decimal::new(123456789, 9), 8);
//! assert_eq!(credited.to_string(), "0.12345678");
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

/// Fractional digits for crypto quantities, prices and rates
pub const CRYPTO_SCALE: u32 = 8;

/// Fractional digits for fiat cash amounts
pub const FIAT_SCALE: u32 = 2;

/// Fractional digits kept for derived percentages (P&L %)
pub const PERCENT_SCALE: u32 = 8;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Parse: Client → Ledger (String/Decimal → Decimal at scale)
// ============================================================================

/// Convert a client amount string into a positive decimal at `decimals` scale
///
/// # Errors
/// * `PrecisionOverflow` - If input has more decimal places than allowed
/// * `InvalidAmount` - If amount is zero or negative
/// * `InvalidFormat` - If string format is invalid (commas, exponents, `.5`, `5.`)
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => {
            // Require both sides of the dot: ".5" and "5." are ambiguous
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            if decimals == 0 {
                return Err(MoneyError::InvalidFormat(
                    "decimals is 0, but dot provided".into(),
                ));
            }
            (parts[0], parts[1])
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if !whole.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in whole part: {}",
            whole
        )));
    }
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat("invalid fractional part".into()));
    }

    // Reject, never truncate
    if frac.len() > decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: decimals,
        });
    }

    let amount = Decimal::from_str_exact(amount_str).map_err(|_| MoneyError::Overflow)?;
    if amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    Ok(amount)
}

/// Validate an already-decoded decimal as a positive amount at `decimals` scale
///
/// Used at the command boundary where `Decimal` arrives from JSON.
pub fn check_amount(amount: Decimal, decimals: u32) -> Result<Decimal, MoneyError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let normalized = amount.normalize();
    if normalized.scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: decimals,
        });
    }

    Ok(amount)
}

// ============================================================================
// Quantize
// ============================================================================

/// Round toward zero at `decimals` (amounts credited to the user)
#[inline]
pub fn round_down(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// Round away from zero at `decimals` (amounts charged to the user)
#[inline]
pub fn round_up(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::AwayFromZero)
}

/// Banker's rounding at `decimals` (derived figures with no direction)
#[inline]
pub fn round_even(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointNearestEven)
}

// ============================================================================
// Checked Arithmetic
// ============================================================================

#[inline]
pub fn mul(a: Decimal, b: Decimal) -> Result<Decimal, MoneyError> {
    a.checked_mul(b).ok_or(MoneyError::Overflow)
}

#[inline]
pub fn div(a: Decimal, b: Decimal) -> Result<Decimal, MoneyError> {
    if b.is_zero() {
        return Err(MoneyError::DivisionByZero);
    }
    a.checked_div(b).ok_or(MoneyError::Overflow)
}

#[inline]
pub fn add(a: Decimal, b: Decimal) -> Result<Decimal, MoneyError> {
    a.checked_add(b).ok_or(MoneyError::Overflow)
}

/// `part / whole * 100`, or zero when `whole` is zero
pub fn percentage(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    part.checked_div(whole)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(|pct| round_even(pct, PERCENT_SCALE))
        .unwrap_or(Decimal::ZERO)
}
