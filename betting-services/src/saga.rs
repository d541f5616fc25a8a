//! Compensating actions and retries for multi-row mutations
//!
//! The store only guarantees single-row atomicity. A sequence of writes
//! records the inverse of every applied step; if a later step fails the
//! inverses run in reverse order.

use betting_core::{BettingError, Side};
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::store::{LedgerStore, StoreError};

/// Pause between retry attempts, multiplied by the attempt number
const RETRY_BACKOFF_MS: u64 = 25;

/// Inverse of one applied mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Undo {
    /// Return a debited stake to the user
    CreditBalance { user_id: String, amount: Decimal },
    /// Remove a stake added to a pool
    DecrementPool {
        market_id: String,
        side: Side,
        amount: Decimal,
    },
}

/// Ordered record of applied steps for one operation
pub struct Saga<'a> {
    store: &'a dyn LedgerStore,
    operation: &'static str,
    applied: Vec<Undo>,
}

impl<'a> Saga<'a> {
    pub fn new(store: &'a dyn LedgerStore, operation: &'static str) -> Self {
        Self {
            store,
            operation,
            applied: Vec::new(),
        }
    }

    /// Record the inverse of a step that has just succeeded
    pub fn applied(&mut self, undo: Undo) {
        self.applied.push(undo);
    }

    /// Undo every applied step, newest first, and return the error to report.
    ///
    /// If every inverse succeeds the original `cause` is returned. If any
    /// inverse fails the remaining ones still run, the failure is logged for
    /// manual reconciliation and a `StorageFailure` describing it is returned.
    pub async fn abort(self, cause: BettingError) -> BettingError {
        let mut failures = Vec::new();

        for undo in self.applied.into_iter().rev() {
            let result = match &undo {
                Undo::CreditBalance { user_id, amount } => self
                    .store
                    .credit_balance(user_id, *amount)
                    .await
                    .map(|_| ()),
                Undo::DecrementPool {
                    market_id,
                    side,
                    amount,
                } => self
                    .store
                    .decrement_pool(market_id, *side, *amount)
                    .await
                    .map(|_| ()),
            };

            if let Err(e) = result {
                error!(
                    operation = self.operation,
                    "Compensation failed, manual reconciliation required: {:?}: {}", undo, e
                );
                failures.push(format!("{:?}: {}", undo, e));
            }
        }

        if failures.is_empty() {
            warn!(operation = self.operation, "Rolled back after: {}", cause);
            cause
        } else {
            BettingError::storage(format!(
                "{} failed ({}) and rollback is incomplete, manual reconciliation required: {}",
                self.operation,
                cause,
                failures.join("; ")
            ))
        }
    }
}

/// Sleep before retry number `attempt + 1`
pub async fn backoff(attempt: u32) {
    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
}

/// Run a store call up to `attempts` times, backing off between attempts
pub async fn with_retries<T, F, Fut>(
    attempts: u32,
    label: &str,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("{} failed (attempt {}/{}): {}", label, attempt, attempts, e);
                backoff(attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryLedger, StoreOp};
    use betting_core::{ErrorKind, User};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_abort_runs_inverses_and_keeps_cause() {
        let ledger = InMemoryLedger::new();
        ledger.insert_user(&User::new("alice", dec!(5))).await.unwrap();

        let mut saga = Saga::new(&ledger, "test");
        saga.applied(Undo::CreditBalance {
            user_id: "alice".to_string(),
            amount: dec!(5),
        });
        let err = saga.abort(BettingError::storage("boom")).await;

        assert_eq!(err, BettingError::storage("boom"));
        assert_eq!(ledger.get_user("alice").await.unwrap().unwrap().balance, dec!(10));
    }

    #[tokio::test]
    async fn test_abort_reports_incomplete_rollback() {
        let ledger = InMemoryLedger::new();
        ledger.insert_user(&User::new("alice", dec!(5))).await.unwrap();
        ledger.fail_next(StoreOp::CreditBalance, 1);

        let mut saga = Saga::new(&ledger, "test");
        saga.applied(Undo::CreditBalance {
            user_id: "alice".to_string(),
            amount: dec!(5),
        });
        let err = saga.abort(BettingError::storage("boom")).await;

        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(err.to_string().contains("manual reconciliation"));
    }

    #[tokio::test]
    async fn test_with_retries_recovers() {
        let ledger = InMemoryLedger::new();
        ledger.insert_user(&User::new("alice", dec!(0))).await.unwrap();
        ledger.fail_next(StoreOp::CreditBalance, 2);

        let balance = with_retries(3, "credit", || ledger.credit_balance("alice", dec!(1)))
            .await
            .unwrap();
        assert_eq!(balance, dec!(1));
    }

    #[tokio::test]
    async fn test_with_retries_gives_up() {
        let ledger = InMemoryLedger::new();
        ledger.insert_user(&User::new("alice", dec!(0))).await.unwrap();
        ledger.fail_next(StoreOp::CreditBalance, 3);

        let result = with_retries(3, "credit", || ledger.credit_balance("alice", dec!(1))).await;
        assert!(result.is_err());
        assert_eq!(ledger.get_user("alice").await.unwrap().unwrap().balance, dec!(0));
    }
}
