//! Error types for the betting engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-wide error type
///
/// Every rejection carries a human-readable reason. Validation errors are
/// raised before any mutation, `StorageFailure` may follow a compensated
/// partial mutation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BettingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Amount {amount} out of range: minimum {min}, maximum {max}")]
    AmountOutOfRange {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("Insufficient funds: balance is {balance}, bet requires {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Market {0} is no longer active")]
    MarketClosed(String),

    #[error("Market {market_id} ended at {end_date}")]
    MarketExpired {
        market_id: String,
        end_date: DateTime<Utc>,
    },

    #[error("Too many bets on this market: wait {retry_after_ms}ms before betting again")]
    RateLimited { retry_after_ms: u64 },

    #[error("Market {0} is already resolved")]
    AlreadyResolved(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Market {market_id} has not ended yet (ends at {ends_at})")]
    NotYetEnded {
        market_id: String,
        ends_at: DateTime<Utc>,
    },

    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

/// Error kind, independent of the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    AmountOutOfRange,
    InsufficientFunds,
    NotFound,
    MarketClosed,
    MarketExpired,
    RateLimited,
    AlreadyResolved,
    Forbidden,
    NotYetEnded,
    StorageFailure,
}

impl BettingError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        BettingError::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        BettingError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        BettingError::Forbidden(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        BettingError::StorageFailure(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BettingError::InvalidInput(_) => ErrorKind::InvalidInput,
            BettingError::AmountOutOfRange { .. } => ErrorKind::AmountOutOfRange,
            BettingError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            BettingError::NotFound(_) => ErrorKind::NotFound,
            BettingError::MarketClosed(_) => ErrorKind::MarketClosed,
            BettingError::MarketExpired { .. } => ErrorKind::MarketExpired,
            BettingError::RateLimited { .. } => ErrorKind::RateLimited,
            BettingError::AlreadyResolved(_) => ErrorKind::AlreadyResolved,
            BettingError::Forbidden(_) => ErrorKind::Forbidden,
            BettingError::NotYetEnded { .. } => ErrorKind::NotYetEnded,
            BettingError::StorageFailure(_) => ErrorKind::StorageFailure,
        }
    }
}

/// Result type alias for engine operations
pub type BettingResult<T> = Result<T, BettingError>;
