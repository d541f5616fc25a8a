//! Business logic services for the pari-mutuel betting engine
//!
//! This crate provides the ledger store boundary and the services built on
//! it: bet placement, market resolution, reconciliation of deferred credits,
//! cleanup, and market/account management.

pub mod account_service;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod market_service;
pub mod placement;
pub mod rate_limiter;
pub mod reconciliation;
pub mod resolution;
pub mod saga;
pub mod store;
pub mod validation;

pub use account_service::AccountService;
pub use cleanup::{CleanupService, CleanupSummary};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BettingConfig, ConfigError};
pub use market_service::MarketService;
pub use placement::{BetIntent, BetPlacementService, PlacementReceipt};
pub use rate_limiter::{BetThrottle, ThrottleStats};
pub use reconciliation::{ReconciliationReport, ReconciliationService};
pub use resolution::{MarketResolutionService, ResolutionSummary, SettlementPlan};
pub use store::{
    CreditKind, InMemoryLedger, LedgerStore, PendingCredit, SqliteLedger, StoreError, StoreOp,
};
