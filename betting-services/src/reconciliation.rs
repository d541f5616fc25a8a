//! Reconciliation of deferred settlement credits
//!
//! Resolution queues credits it could not apply. Retrying is idempotent: an
//! entry is only removed after its balance credit and payout record both
//! succeeded, and a credited balance is remembered so it is never paid twice.

use betting_core::BettingResult;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::resolution::stakes_match;
use crate::store::{CreditKind, LedgerStore, PendingCredit};

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub attempted: usize,
    pub settled: usize,
    pub still_pending: usize,
}

/// Service that retries queued settlement credits
pub struct ReconciliationService {
    store: Arc<dyn LedgerStore>,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Credits waiting to be applied, oldest first
    pub async fn list_pending(&self) -> BettingResult<Vec<PendingCredit>> {
        Ok(self.store.list_pending_credits().await?)
    }

    /// Queued credits owed to one user
    pub async fn list_pending_for(&self, user_id: &str) -> BettingResult<Vec<PendingCredit>> {
        let mut credits = self.store.list_pending_credits().await?;
        credits.retain(|credit| credit.user_id == user_id);
        Ok(credits)
    }

    /// Retry every queued credit once
    #[instrument(skip(self))]
    pub async fn retry_pending(&self) -> BettingResult<ReconciliationReport> {
        let pending = self.store.list_pending_credits().await?;
        let mut report = ReconciliationReport {
            attempted: pending.len(),
            ..ReconciliationReport::default()
        };

        for credit in pending {
            if self.retry_one(&credit).await {
                report.settled += 1;
            } else {
                report.still_pending += 1;
            }
        }

        if report.attempted > 0 {
            info!(
                "Reconciliation pass: {} attempted, {} settled, {} still pending",
                report.attempted, report.settled, report.still_pending
            );
        }
        Ok(report)
    }

    async fn retry_one(&self, credit: &PendingCredit) -> bool {
        if credit.kind == CreditKind::Unmatched {
            return self.recheck_unmatched(credit).await;
        }

        let mut balance_credited = credit.balance_credited;

        if !balance_credited {
            if let Err(e) = self.store.credit_balance(&credit.user_id, credit.amount).await {
                warn!("Retry credit {} to {} failed: {}", credit.amount, credit.user_id, e);
                self.bump(credit, false).await;
                return false;
            }
            balance_credited = true;
        }

        if credit.kind == CreditKind::Payout {
            if let Err(e) = self.store.set_bet_payout(&credit.bet_id, credit.amount).await {
                warn!("Retry payout record for bet {} failed: {}", credit.bet_id, e);
                self.bump(credit, balance_credited).await;
                return false;
            }
        }

        self.clear(credit, balance_credited).await
    }

    /// Clear an unmatched-stake entry once the market's bets add up to its pools
    async fn recheck_unmatched(&self, credit: &PendingCredit) -> bool {
        let market = match self.store.get_market(&credit.market_id).await {
            Ok(Some(market)) => market,
            Ok(None) => {
                // deleted by cleanup together with its bets
                return self.clear(credit, false).await;
            }
            Err(e) => {
                warn!("Recheck of market {} failed: {}", credit.market_id, e);
                self.bump(credit, false).await;
                return false;
            }
        };

        match self.store.list_bets_for_market(&credit.market_id).await {
            Ok(bets) if stakes_match(&market.pools, &bets) => self.clear(credit, false).await,
            Ok(_) => {
                warn!(
                    "Market {} still holds stake no bet accounts for (yes={} no={})",
                    market.id, market.pools.yes_pool, market.pools.no_pool
                );
                self.bump(credit, false).await;
                false
            }
            Err(e) => {
                warn!("Recheck of bets on {} failed: {}", credit.market_id, e);
                self.bump(credit, false).await;
                false
            }
        }
    }

    async fn clear(&self, credit: &PendingCredit, balance_credited: bool) -> bool {
        if let Err(e) = self.store.remove_pending_credit(&credit.id).await {
            warn!("Could not clear settled credit {}: {}", credit.id, e);
            // remember the credit so the next pass does not pay it again
            self.bump(credit, balance_credited).await;
            return false;
        }
        true
    }

    async fn bump(&self, credit: &PendingCredit, balance_credited: bool) {
        if let Err(e) = self
            .store
            .bump_pending_credit(&credit.id, balance_credited)
            .await
        {
            error!(
                "Could not update pending credit {}, manual reconciliation required \
                 (balance_credited={}): {}",
                credit.id, balance_credited, e
            );
        }
    }
}
