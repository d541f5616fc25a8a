//! Core types for the pari-mutuel betting engine
//!
//! This crate defines the shared data structures used across the engine:
//! users and their balances, markets with their yes/no pools, bets, and the
//! error taxonomy returned by every service.

pub mod bet;
pub mod error;
pub mod market;
pub mod side;
pub mod user;

pub use bet::{Bet, NewBet};
pub use error::{BettingError, BettingResult, ErrorKind};
pub use market::{Market, MarketStatus, NewMarket, PoolSnapshot};
pub use side::Side;
pub use user::User;

/// Opaque user identifier supplied by the authentication collaborator
pub type UserId = String;

/// Market identifier
pub type MarketId = String;

/// Bet identifier
pub type BetId = String;
