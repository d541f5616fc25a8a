//! Market resolution
//!
//! Declares a market's outcome and distributes its pools pari-mutuel style:
//! each winning bet gets its stake back plus a share of the losing pool
//! proportional to its stake. If nobody backed the winning side every bettor
//! is refunded instead.
//!
//! The market is claimed (`active -> resolved`) before any credit is paid, so
//! pools are frozen and concurrent resolutions are refused. Credits that keep
//! failing after retries go to the reconciliation queue rather than aborting
//! the resolution.

use betting_core::{
    Bet, BettingError, BettingResult, MarketStatus, PoolSnapshot, Side,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::BettingConfig;
use crate::saga::{backoff, with_retries};
use crate::store::{CreditKind, LedgerStore, PendingCredit};
use crate::validation;

/// One balance credit owed by a settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credit {
    pub bet_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub kind: CreditKind,
}

/// Credits owed for a market, computed from frozen pools and its bets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub outcome: Side,
    /// True when the winning pool was empty and every stake is returned
    pub refunded: bool,
    pub credits: Vec<Credit>,
}

impl SettlementPlan {
    /// Sum of all credits in the plan
    pub fn total(&self) -> Decimal {
        self.credits.iter().map(|c| c.amount).sum()
    }
}

/// Pari-mutuel winnings for a winning stake: the stake plus its share of the losing pool
pub fn winnings(stake: Decimal, winning_pool: Decimal, losing_pool: Decimal, scale: u32) -> Decimal {
    if winning_pool.is_zero() {
        return stake;
    }
    (stake + losing_pool * stake / winning_pool).round_dp(scale)
}

/// Compute the credits for resolving `pools` to `outcome`
pub fn settle(pools: &PoolSnapshot, outcome: Side, bets: &[Bet], scale: u32) -> SettlementPlan {
    let winning_pool = pools.pool_for(outcome);
    let losing_pool = pools.pool_for(outcome.opposite());

    if winning_pool.is_zero() {
        return SettlementPlan {
            outcome,
            refunded: true,
            credits: bets
                .iter()
                .map(|bet| Credit {
                    bet_id: bet.id.clone(),
                    user_id: bet.user_id.clone(),
                    amount: bet.amount,
                    kind: CreditKind::Refund,
                })
                .collect(),
        };
    }

    SettlementPlan {
        outcome,
        refunded: false,
        credits: bets
            .iter()
            .filter(|bet| bet.is_winner(outcome))
            .map(|bet| Credit {
                bet_id: bet.id.clone(),
                user_id: bet.user_id.clone(),
                amount: winnings(bet.amount, winning_pool, losing_pool, scale),
                kind: CreditKind::Payout,
            })
            .collect(),
    }
}

/// Outcome of a resolution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionSummary {
    pub market_id: String,
    pub outcome: Side,
    /// Winning bets paid out (always 0 for a refund)
    pub winners_count: usize,
    /// Sum of credits actually applied
    pub total_distributed: Decimal,
    pub total_pool: Decimal,
    pub refunded: bool,
    /// Credits deferred to the reconciliation queue
    pub pending_credits: usize,
    pub resolved_at: DateTime<Utc>,
}

/// Service that resolves markets and distributes their pools
pub struct MarketResolutionService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: BettingConfig,
}

impl MarketResolutionService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: BettingConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Resolve `market_id` to `outcome` on behalf of `caller_id`
    ///
    /// Preconditions, in order: valid outcome, market exists, not already
    /// resolved, caller is the creator, end date reached.
    #[instrument(skip(self))]
    pub async fn resolve_market(
        &self,
        caller_id: &str,
        market_id: &str,
        outcome: &str,
    ) -> BettingResult<ResolutionSummary> {
        let market_id = validation::require_id("marketId", market_id)?;
        let outcome = validation::parse_side(outcome)?;

        let market = self
            .store
            .get_market(market_id)
            .await?
            .ok_or_else(|| BettingError::not_found(format!("Market {}", market_id)))?;
        if market.status == MarketStatus::Resolved {
            return Err(BettingError::AlreadyResolved(market.id));
        }
        if market.created_by != caller_id {
            return Err(BettingError::forbidden(
                "Only the market creator can resolve this market",
            ));
        }
        let now = self.clock.now();
        if !market.has_ended(now) {
            return Err(BettingError::NotYetEnded {
                market_id: market.id,
                ends_at: market.end_date,
            });
        }

        // Read-only; a failure here leaves the market untouched
        let attempts = self.config.credit_retry_attempts;
        let bets = with_retries(attempts, "list bets", || {
            self.store.list_bets_for_market(market_id)
        })
        .await?;

        let frozen = self
            .store
            .set_market_resolved(market_id, outcome, now)
            .await?
            .ok_or_else(|| BettingError::AlreadyResolved(market_id.to_string()))?;
        info!(
            "Market {} resolved {} by {} (yes={} no={})",
            market_id, outcome, caller_id, frozen.pools.yes_pool, frozen.pools.no_pool
        );

        let (pools, bets, unmatched) = self.settled_stakes(market_id, frozen.pools, bets).await;

        let plan = settle(&pools, outcome, &bets, self.config.payout_scale);
        let mut summary = ResolutionSummary {
            market_id: market_id.to_string(),
            outcome,
            winners_count: 0,
            total_distributed: Decimal::ZERO,
            total_pool: pools.total_pool,
            refunded: plan.refunded,
            pending_credits: 0,
            resolved_at: now,
        };

        for (side, stake) in unmatched {
            error!(
                "Market {} holds {} on {} that no bet accounts for; queued for reconciliation",
                market_id, stake, side
            );
            let credit = Credit {
                bet_id: String::new(),
                user_id: String::new(),
                amount: stake,
                kind: CreditKind::Unmatched,
            };
            self.defer(market_id, &credit, false, now).await;
            summary.pending_credits += 1;
        }

        for credit in &plan.credits {
            match self.apply_credit(market_id, credit, now).await {
                CreditOutcome::Applied => {
                    summary.total_distributed += credit.amount;
                    if credit.kind == CreditKind::Payout {
                        summary.winners_count += 1;
                    }
                }
                CreditOutcome::BalanceOnly => {
                    summary.total_distributed += credit.amount;
                    summary.winners_count += 1;
                    summary.pending_credits += 1;
                }
                CreditOutcome::Deferred => summary.pending_credits += 1,
            }
        }

        info!(
            "Market {} settled: {} winners, {} distributed of {}, {} pending{}",
            market_id,
            summary.winners_count,
            summary.total_distributed,
            summary.total_pool,
            summary.pending_credits,
            if summary.refunded { " (refund)" } else { "" }
        );
        Ok(summary)
    }

    /// Settle only stakes that are backed by bets
    ///
    /// A placement caught between its pool increment and its bet insert either
    /// lands before the claim or rolls back after it, so the pools and the bets
    /// are re-read with backoff until they agree. Returns the pools rebuilt
    /// from the bets, the bets, and any per-side stake still unaccounted for.
    async fn settled_stakes(
        &self,
        market_id: &str,
        mut pools: PoolSnapshot,
        mut bets: Vec<Bet>,
    ) -> (PoolSnapshot, Vec<Bet>, Vec<(Side, Decimal)>) {
        let attempts = self.config.credit_retry_attempts;
        let store = self.store.as_ref();

        let mut attempt = 1;
        while !stakes_match(&pools, &bets) && attempt < attempts {
            debug!(
                "Bets on {} do not add up to its pools yet (attempt {}/{})",
                market_id, attempt, attempts
            );
            backoff(attempt).await;
            attempt += 1;

            let market = with_retries(attempts, "re-read market", || store.get_market(market_id)).await;
            let listed =
                with_retries(attempts, "re-list bets", || store.list_bets_for_market(market_id)).await;
            match (market, listed) {
                (Ok(Some(market)), Ok(listed)) => {
                    pools = market.pools;
                    bets = listed;
                }
                (Ok(None), _) => warn!("Market {} vanished during settlement", market_id),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Re-reading stakes for {} failed: {}", market_id, e)
                }
            }
        }

        let backed = PoolSnapshot::new(staked(&bets, Side::Yes), staked(&bets, Side::No));
        let unmatched = [Side::Yes, Side::No]
            .into_iter()
            .map(|side| (side, (pools.pool_for(side) - backed.pool_for(side)).abs()))
            .filter(|(_, stake)| !stake.is_zero())
            .collect();
        (backed, bets, unmatched)
    }

    /// Credit one bettor, deferring to the reconciliation queue on failure
    async fn apply_credit(&self, market_id: &str, credit: &Credit, now: DateTime<Utc>) -> CreditOutcome {
        let attempts = self.config.credit_retry_attempts;
        let store = self.store.as_ref();

        let credited = with_retries(attempts, "settlement credit", || {
            store.credit_balance(&credit.user_id, credit.amount)
        })
        .await;
        if let Err(e) = credited {
            error!(
                "Credit of {} to {} for bet {} failed: {}",
                credit.amount, credit.user_id, credit.bet_id, e
            );
            self.defer(market_id, credit, false, now).await;
            return CreditOutcome::Deferred;
        }
        debug!("Credited {} to {} ({})", credit.amount, credit.user_id, credit.kind.as_str());

        if credit.kind == CreditKind::Payout {
            let recorded = with_retries(attempts, "payout record", || {
                store.set_bet_payout(&credit.bet_id, credit.amount)
            })
            .await;
            if let Err(e) = recorded {
                error!("Payout record for bet {} failed: {}", credit.bet_id, e);
                self.defer(market_id, credit, true, now).await;
                return CreditOutcome::BalanceOnly;
            }
        }

        CreditOutcome::Applied
    }

    async fn defer(&self, market_id: &str, credit: &Credit, balance_credited: bool, now: DateTime<Utc>) {
        let pending = PendingCredit {
            id: Uuid::new_v4().to_string(),
            market_id: market_id.to_string(),
            bet_id: credit.bet_id.clone(),
            user_id: credit.user_id.clone(),
            amount: credit.amount,
            kind: credit.kind,
            balance_credited,
            attempts: self.config.credit_retry_attempts,
            created_at: now,
        };
        if let Err(e) = self.store.record_pending_credit(&pending).await {
            error!(
                "Could not queue credit for reconciliation, manual reconciliation required: {:?}: {}",
                pending, e
            );
        }
    }
}

enum CreditOutcome {
    Applied,
    /// Balance credited but the payout record is queued
    BalanceOnly,
    Deferred,
}

fn staked(bets: &[Bet], side: Side) -> Decimal {
    bets.iter().filter(|b| b.side == side).map(|b| b.amount).sum()
}

/// Whether the listed bets account for exactly the pooled stakes
pub(crate) fn stakes_match(pools: &PoolSnapshot, bets: &[Bet]) -> bool {
    staked(bets, Side::Yes) == pools.yes_pool && staked(bets, Side::No) == pools.no_pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{InMemoryLedger, StoreOp};
    use betting_core::{ErrorKind, NewBet, NewMarket, User};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn bet(id: &str, user: &str, side: Side, amount: Decimal) -> Bet {
        NewBet {
            market_id: "m1".to_string(),
            user_id: user.to_string(),
            side,
            amount,
            created_at: Utc::now(),
        }
        .into_bet(id.to_string())
    }

    #[test]
    fn test_single_winner_takes_pool() {
        let pools = PoolSnapshot::new(dec!(30), dec!(70));
        let bets = vec![
            bet("b1", "alice", Side::Yes, dec!(30)),
            bet("b2", "bob", Side::No, dec!(70)),
        ];
        let plan = settle(&pools, Side::Yes, &bets, 9);

        assert!(!plan.refunded);
        assert_eq!(plan.credits.len(), 1);
        assert_eq!(plan.credits[0].user_id, "alice");
        assert_eq!(plan.credits[0].amount, dec!(100));
    }

    #[test]
    fn test_distribution_conserves_pool() {
        let pools = PoolSnapshot::new(dec!(30), dec!(10));
        let bets = vec![
            bet("b1", "a", Side::Yes, dec!(10)),
            bet("b2", "b", Side::Yes, dec!(10)),
            bet("b3", "c", Side::Yes, dec!(10)),
            bet("b4", "d", Side::No, dec!(7)),
            bet("b5", "e", Side::No, dec!(3)),
        ];
        let plan = settle(&pools, Side::Yes, &bets, 9);

        assert_eq!(plan.credits.len(), 3);
        let diff = (plan.total() - pools.total_pool).abs();
        assert!(diff <= dec!(0.000000003), "off by {}", diff);
        assert!(plan.credits.iter().all(|c| c.kind == CreditKind::Payout));
    }

    #[test]
    fn test_empty_winning_side_refunds_everyone() {
        let pools = PoolSnapshot::new(dec!(0), dec!(12));
        let bets = vec![
            bet("b1", "a", Side::No, dec!(5)),
            bet("b2", "b", Side::No, dec!(7)),
        ];
        let plan = settle(&pools, Side::Yes, &bets, 9);

        assert!(plan.refunded);
        assert_eq!(plan.credits.len(), 2);
        assert_eq!(plan.credits[0].amount, dec!(5));
        assert_eq!(plan.credits[1].amount, dec!(7));
        assert!(plan.credits.iter().all(|c| c.kind == CreditKind::Refund));
    }

    #[test]
    fn test_no_bets_at_all() {
        let plan = settle(&PoolSnapshot::default(), Side::No, &[], 9);
        assert!(plan.refunded);
        assert!(plan.credits.is_empty());
    }

    // ------------------------------------------------------------------------

    struct Harness {
        ledger: Arc<InMemoryLedger>,
        clock: Arc<ManualClock>,
        service: MarketResolutionService,
    }

    /// Market m1 by carol, ending in one hour, with the given bets applied
    async fn harness(bets: &[(&str, Side, Decimal)]) -> Harness {
        let ledger = Arc::new(InMemoryLedger::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service =
            MarketResolutionService::new(ledger.clone(), clock.clone(), BettingConfig::default());

        let market = NewMarket {
            title: "Will the launch slip?".to_string(),
            description: None,
            category: None,
            end_date: clock.now() + Duration::hours(1),
        }
        .into_market("m1".to_string(), "carol".to_string(), clock.now());
        ledger.insert_market(&market).await.unwrap();

        for (user, side, amount) in bets {
            ledger.insert_user(&User::new(*user, dec!(0))).await.unwrap();
            ledger.increment_pool("m1", *side, *amount).await.unwrap();
            ledger
                .insert_bet(NewBet {
                    market_id: "m1".to_string(),
                    user_id: user.to_string(),
                    side: *side,
                    amount: *amount,
                    created_at: clock.now(),
                })
                .await
                .unwrap();
        }

        Harness {
            ledger,
            clock,
            service,
        }
    }

    async fn balance(h: &Harness, user: &str) -> Decimal {
        h.ledger.get_user(user).await.unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn test_resolution_pays_winners() {
        let h = harness(&[
            ("alice", Side::Yes, dec!(30)),
            ("bob", Side::No, dec!(70)),
        ])
        .await;
        h.clock.advance(Duration::hours(1));

        let summary = h.service.resolve_market("carol", "m1", "yes").await.unwrap();
        assert_eq!(summary.winners_count, 1);
        assert_eq!(summary.total_distributed, dec!(100));
        assert_eq!(summary.pending_credits, 0);
        assert_eq!(balance(&h, "alice").await, dec!(100));
        assert_eq!(balance(&h, "bob").await, dec!(0));

        let bets = h.ledger.list_bets_for_market("m1").await.unwrap();
        for bet in bets {
            match bet.side {
                Side::Yes => assert_eq!(bet.payout, Some(dec!(100))),
                Side::No => assert_eq!(bet.payout, None),
            }
        }

        let market = h.ledger.get_market("m1").await.unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Resolved);
        assert_eq!(market.outcome, Some(Side::Yes));
    }

    #[tokio::test]
    async fn test_refund_when_winning_side_empty() {
        let h = harness(&[
            ("alice", Side::No, dec!(4)),
            ("bob", Side::No, dec!(6)),
        ])
        .await;
        h.clock.advance(Duration::hours(2));

        let summary = h.service.resolve_market("carol", "m1", "yes").await.unwrap();
        assert!(summary.refunded);
        assert_eq!(summary.winners_count, 0);
        assert_eq!(summary.total_distributed, dec!(10));
        assert_eq!(balance(&h, "alice").await, dec!(4));
        assert_eq!(balance(&h, "bob").await, dec!(6));
        assert!(h
            .ledger
            .list_bets_for_market("m1")
            .await
            .unwrap()
            .iter()
            .all(|b| b.payout.is_none()));
    }

    #[tokio::test]
    async fn test_preconditions() {
        let h = harness(&[("alice", Side::Yes, dec!(1))]).await;

        let err = h.service.resolve_market("carol", "m1", "maybe").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = h.service.resolve_market("carol", "zz", "yes").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = h.service.resolve_market("alice", "m1", "yes").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err = h.service.resolve_market("carol", "m1", "yes").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotYetEnded);
        let market = h.ledger.get_market("m1").await.unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Active);
        assert_eq!(market.outcome, None);
        assert_eq!(balance(&h, "alice").await, dec!(0));

        h.clock.advance(Duration::hours(1));
        h.service.resolve_market("carol", "m1", "yes").await.unwrap();
        let err = h.service.resolve_market("carol", "m1", "no").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyResolved);
        // paid exactly once
        assert_eq!(balance(&h, "alice").await, dec!(1));
    }

    #[tokio::test]
    async fn test_failed_credit_is_queued() {
        let h = harness(&[
            ("alice", Side::Yes, dec!(10)),
            ("bob", Side::Yes, dec!(10)),
            ("dave", Side::No, dec!(20)),
        ])
        .await;
        h.clock.advance(Duration::hours(1));
        // exhaust every retry of the first credit
        h.ledger.fail_next(StoreOp::CreditBalance, 3);

        let summary = h.service.resolve_market("carol", "m1", "yes").await.unwrap();
        assert_eq!(summary.winners_count, 1);
        assert_eq!(summary.pending_credits, 1);
        assert_eq!(summary.total_distributed, dec!(20));
        assert_eq!(balance(&h, "alice").await, dec!(0));
        assert_eq!(balance(&h, "bob").await, dec!(20));

        let pending = h.ledger.list_pending_credits().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, "alice");
        assert_eq!(pending[0].amount, dec!(20));
        assert!(!pending[0].balance_credited);

        let market = h.ledger.get_market("m1").await.unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Resolved);
    }

    #[tokio::test]
    async fn test_bet_listing_failure_leaves_market_active() {
        let h = harness(&[("alice", Side::Yes, dec!(1))]).await;
        h.clock.advance(Duration::hours(1));
        h.ledger.fail_next(StoreOp::ListBets, 3);

        let err = h.service.resolve_market("carol", "m1", "yes").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        let market = h.ledger.get_market("m1").await.unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Active);
    }
}
