//! Engine configuration
//!
//! Bet limits, the per-market throttle window, the cleanup retention count
//! and settlement tuning live here rather than inline in the services.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Tunables shared by the betting services
#[derive(Debug, Clone, PartialEq)]
pub struct BettingConfig {
    /// Smallest accepted stake
    pub min_bet: Decimal,
    /// Largest accepted stake
    pub max_bet: Decimal,
    /// Minimum spacing between two bets by one user on one market
    pub rate_limit_window: Duration,
    /// Number of most recent markets a creator keeps on cleanup
    pub cleanup_keep: usize,
    /// Inline attempts for each settlement credit before it is queued
    pub credit_retry_attempts: u32,
    /// Decimal places payouts are rounded to
    pub payout_scale: u32,
    /// Balance granted to a newly opened account
    pub starting_balance: Decimal,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            min_bet: Decimal::new(1, 2),
            max_bet: Decimal::from(10_000),
            rate_limit_window: Duration::from_millis(2_000),
            cleanup_keep: 10,
            credit_retry_attempts: 3,
            payout_scale: 9,
            starting_balance: Decimal::from(100),
        }
    }
}

impl BettingConfig {
    /// Load configuration from environment variables, falling back to defaults
    ///
    /// Recognized:
    /// - BETTING_MIN_BET, BETTING_MAX_BET, BETTING_STARTING_BALANCE: decimals
    /// - BETTING_RATE_LIMIT_MS: milliseconds
    /// - BETTING_CLEANUP_KEEP, BETTING_CREDIT_RETRIES, BETTING_PAYOUT_SCALE: integers
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            min_bet: read_var("BETTING_MIN_BET")?.unwrap_or(defaults.min_bet),
            max_bet: read_var("BETTING_MAX_BET")?.unwrap_or(defaults.max_bet),
            rate_limit_window: read_var::<u64>("BETTING_RATE_LIMIT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.rate_limit_window),
            cleanup_keep: read_var("BETTING_CLEANUP_KEEP")?.unwrap_or(defaults.cleanup_keep),
            credit_retry_attempts: read_var("BETTING_CREDIT_RETRIES")?
                .unwrap_or(defaults.credit_retry_attempts),
            payout_scale: read_var("BETTING_PAYOUT_SCALE")?.unwrap_or(defaults.payout_scale),
            starting_balance: read_var("BETTING_STARTING_BALANCE")?
                .unwrap_or(defaults.starting_balance),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that the bet range is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_bet <= Decimal::ZERO {
            return Err(ConfigError::InvalidRange(format!(
                "min_bet must be positive, got {}",
                self.min_bet
            )));
        }
        if self.max_bet < self.min_bet {
            return Err(ConfigError::InvalidRange(format!(
                "max_bet {} is below min_bet {}",
                self.max_bet, self.min_bet
            )));
        }
        if self.credit_retry_attempts == 0 {
            return Err(ConfigError::InvalidRange(
                "credit_retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Throttle window in milliseconds, as reported to callers
    pub fn rate_limit_window_ms(&self) -> u64 {
        self.rate_limit_window.as_millis() as u64
    }
}

fn read_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: String, value: String },

    #[error("Invalid bet range: {0}")]
    InvalidRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_match_house_rules() {
        let config = BettingConfig::default();
        assert_eq!(config.min_bet, dec!(0.01));
        assert_eq!(config.max_bet, dec!(10000));
        assert_eq!(config.rate_limit_window_ms(), 2000);
        assert_eq!(config.cleanup_keep, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_range() {
        let config = BettingConfig {
            min_bet: dec!(10),
            max_bet: dec!(1),
            ..BettingConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRange(_))));
    }

    #[test]
    fn test_rejects_zero_minimum() {
        let config = BettingConfig {
            min_bet: Decimal::ZERO,
            ..BettingConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
