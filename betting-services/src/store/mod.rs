//! Ledger store boundary
//!
//! The store owns durable users, markets and bets. It guarantees atomicity
//! for a single row only; multi-row sequences are made safe by the services
//! through compensating actions.

mod memory;
mod sqlite;

pub use memory::InMemoryLedger;
pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use betting_core::{
    Bet, BetId, BettingError, Market, MarketId, NewBet, PoolSnapshot, Side, User, UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Operations a store performs, used to name failures and to inject them in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetUser,
    InsertUser,
    SetUserBalance,
    DebitBalance,
    CreditBalance,
    GetMarket,
    InsertMarket,
    SetMarketPools,
    IncrementPool,
    DecrementPool,
    SetMarketResolved,
    GetMostRecentBet,
    InsertBet,
    ListBets,
    SetBetPayout,
    ListMarketsByCreator,
    DeleteMarkets,
    RecordPendingCredit,
    ListPendingCredits,
    RemovePendingCredit,
    BumpPendingCredit,
}

/// Errors raised by a ledger store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Row not found in {table}: {id}")]
    Missing { table: &'static str, id: String },

    #[error("Corrupt value in {table}.{column}: {value}")]
    Corrupt {
        table: &'static str,
        column: &'static str,
        value: String,
    },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Injected failure in {0:?}")]
    Injected(StoreOp),
}

impl From<StoreError> for BettingError {
    fn from(err: StoreError) -> Self {
        BettingError::storage(err.to_string())
    }
}

/// Why a settlement credit is owed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditKind {
    /// Winning bet: stake plus share of the losing pool, recorded as the bet's payout
    Payout,
    /// Nobody backed the winning side: stake returned, no payout recorded
    Refund,
    /// Pooled stake no bet accounted for at settlement. Nothing is credited;
    /// the entry clears once the pools and the bets agree again.
    Unmatched,
}

impl CreditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditKind::Payout => "payout",
            CreditKind::Refund => "refund",
            CreditKind::Unmatched => "unmatched",
        }
    }
}

/// A settlement credit that could not be applied during resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCredit {
    pub id: String,
    pub market_id: MarketId,
    pub bet_id: BetId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub kind: CreditKind,
    /// Balance already credited, only the payout record is outstanding
    pub balance_credited: bool,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// Durable storage of users, markets and bets
///
/// Every method is a single-row atomic operation unless stated otherwise.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ---- users -------------------------------------------------------------

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Insert the user if absent. Returns whether a row was created.
    async fn insert_user(&self, user: &User) -> Result<bool, StoreError>;

    async fn set_user_balance(&self, id: &str, balance: Decimal) -> Result<(), StoreError>;

    /// Debit `amount` only if the balance covers it.
    ///
    /// Returns the new balance, or `None` when the balance is too low.
    async fn try_debit_balance(
        &self,
        id: &str,
        amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError>;

    /// Add `amount` to the balance, returning the new balance
    async fn credit_balance(&self, id: &str, amount: Decimal) -> Result<Decimal, StoreError>;

    // ---- markets -----------------------------------------------------------

    async fn get_market(&self, id: &str) -> Result<Option<Market>, StoreError>;

    async fn insert_market(&self, market: &Market) -> Result<(), StoreError>;

    async fn set_market_pools(&self, id: &str, pools: PoolSnapshot) -> Result<(), StoreError>;

    /// Add `amount` to one side while the market is active.
    ///
    /// Returns the new pools, or `None` when the market is no longer active.
    async fn increment_pool(
        &self,
        id: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<Option<PoolSnapshot>, StoreError>;

    /// Remove `amount` from one side regardless of status (compensation only)
    async fn decrement_pool(
        &self,
        id: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<PoolSnapshot, StoreError>;

    /// Transition `active -> resolved` with `outcome`.
    ///
    /// Returns the frozen market, or `None` when it was already resolved.
    async fn set_market_resolved(
        &self,
        id: &str,
        outcome: Side,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<Market>, StoreError>;

    /// Markets created by `user`, newest first
    async fn list_markets_by_creator(&self, user: &str) -> Result<Vec<Market>, StoreError>;

    /// Delete markets together with their bets and chat messages.
    /// Returns the number of markets removed.
    async fn delete_markets(&self, ids: &[MarketId]) -> Result<usize, StoreError>;

    // ---- bets --------------------------------------------------------------

    async fn get_most_recent_bet(
        &self,
        user: &str,
        market: &str,
    ) -> Result<Option<Bet>, StoreError>;

    /// Record a bet while its market is active.
    ///
    /// Returns the stored bet, or `None` when the market is no longer active.
    /// The status check and the insert are one atomic step with respect to
    /// `set_market_resolved`.
    async fn insert_bet(&self, bet: NewBet) -> Result<Option<Bet>, StoreError>;

    async fn list_bets_for_market(&self, market: &str) -> Result<Vec<Bet>, StoreError>;

    async fn set_bet_payout(&self, bet: &str, payout: Decimal) -> Result<(), StoreError>;

    // ---- reconciliation queue ----------------------------------------------

    async fn record_pending_credit(&self, credit: &PendingCredit) -> Result<(), StoreError>;

    /// Pending credits, oldest first
    async fn list_pending_credits(&self) -> Result<Vec<PendingCredit>, StoreError>;

    async fn remove_pending_credit(&self, id: &str) -> Result<(), StoreError>;

    /// Record a failed retry. `balance_credited` is sticky once true.
    async fn bump_pending_credit(
        &self,
        id: &str,
        balance_credited: bool,
    ) -> Result<(), StoreError>;
}
