//! Input validation shared by the services
//!
//! All checks here run before any mutation.

use betting_core::{BettingError, BettingResult, Side};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::config::BettingConfig;

/// Require a non-blank identifier
pub fn require_id<'a>(field: &str, value: &'a str) -> BettingResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BettingError::invalid_input(format!("Missing {}", field)));
    }
    Ok(trimmed)
}

/// Parse a side/outcome; only `yes` and `no` are accepted
pub fn parse_side(raw: &str) -> BettingResult<Side> {
    Side::from_str(raw).map_err(BettingError::invalid_input)
}

/// Parse a stake and check it against the configured bet range
///
/// Anything that is not a finite number is `InvalidInput`; numbers below the
/// minimum (including zero and negatives) or above the maximum are
/// `AmountOutOfRange`, even when they are too large or too precise to parse
/// as a `Decimal`.
pub fn parse_amount(raw: &str, config: &BettingConfig) -> BettingResult<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(BettingError::invalid_input("Missing amount"));
    }

    let amount = match Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed)) {
        Ok(amount) => amount.normalize(),
        Err(_) => return Err(unrepresentable_amount(trimmed, raw, config)),
    };

    if amount < config.min_bet || amount > config.max_bet {
        return Err(BettingError::AmountOutOfRange {
            amount,
            min: config.min_bet,
            max: config.max_bet,
        });
    }

    Ok(amount)
}

/// Classify text `Decimal` cannot hold: numbers too large or too precise
/// are out of range, anything else is malformed
fn unrepresentable_amount(trimmed: &str, raw: &str, config: &BettingConfig) -> BettingError {
    let numeric = trimmed.bytes().any(|b| b.is_ascii_digit());
    match trimmed.parse::<f64>() {
        Ok(value) if numeric && !value.is_nan() => {
            let amount = if value.abs() < 1.0 {
                Decimal::ZERO
            } else if value > 0.0 {
                Decimal::MAX
            } else {
                Decimal::MIN
            };
            BettingError::AmountOutOfRange {
                amount,
                min: config.min_bet,
                max: config.max_bet,
            }
        }
        _ => BettingError::invalid_input(format!("Invalid amount: {:?}", raw)),
    }
}
