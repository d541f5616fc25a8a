//! Bet placement
//!
//! Validates a bet intent, then debits the user, credits the market pool and
//! records the bet. The three writes are separate single-row updates; any
//! failure after the first is compensated so the caller never observes a
//! debit without the matching pool increment and bet record.

use betting_core::{
    Bet, BettingError, BettingResult, MarketStatus, NewBet, PoolSnapshot, Side,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::config::BettingConfig;
use crate::rate_limiter::{BetThrottle, ThrottleStats};
use crate::saga::{Saga, Undo};
use crate::store::LedgerStore;
use crate::validation;

/// A bet as submitted by a client, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetIntent {
    pub market_id: String,
    /// Must be exactly "yes" or "no"
    pub side: String,
    /// Decimal string
    pub amount: String,
}

/// Result of an accepted bet
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementReceipt {
    pub bet: Bet,
    pub new_balance: Decimal,
    pub market: PoolSnapshot,
}

/// Service that validates and applies bets
pub struct BetPlacementService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    throttle: BetThrottle,
    config: BettingConfig,
}

impl BetPlacementService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: BettingConfig) -> Self {
        Self {
            throttle: BetThrottle::new(config.rate_limit_window),
            store,
            clock,
            config,
        }
    }

    pub fn throttle_stats(&self) -> ThrottleStats {
        self.throttle.stats()
    }

    /// Validate and apply a bet for `user_id`
    ///
    /// Validation order: side, amount, balance, market existence, market
    /// status, end date, throttle. Nothing is written unless every check passes.
    #[instrument(skip(self, intent), fields(market_id = %intent.market_id))]
    pub async fn place_bet(&self, user_id: &str, intent: BetIntent) -> BettingResult<PlacementReceipt> {
        let user_id = validation::require_id("userId", user_id)?;
        let market_id = validation::require_id("marketId", &intent.market_id)?;
        let side = validation::parse_side(&intent.side)?;
        let amount = validation::parse_amount(&intent.amount, &self.config)?;

        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| BettingError::not_found(format!("User {}", user_id)))?;
        if !user.can_afford(amount) {
            return Err(BettingError::InsufficientFunds {
                balance: user.balance,
                requested: amount,
            });
        }

        let market = self
            .store
            .get_market(market_id)
            .await?
            .ok_or_else(|| BettingError::not_found(format!("Market {}", market_id)))?;
        if market.status != MarketStatus::Active {
            return Err(BettingError::MarketClosed(market.id));
        }
        let now = self.clock.now();
        if market.has_ended(now) {
            return Err(BettingError::MarketExpired {
                market_id: market.id,
                end_date: market.end_date,
            });
        }

        let last_bet_at = self
            .store
            .get_most_recent_bet(user_id, market_id)
            .await?
            .map(|bet| bet.created_at);
        let reservation = self
            .throttle
            .try_reserve(user_id, market_id, last_bet_at, now)
            .map_err(|retry_after_ms| BettingError::RateLimited { retry_after_ms })?;

        match self.apply(user_id, market_id, side, amount, now).await {
            Ok(receipt) => {
                info!(
                    "Bet {} accepted: {} {} on {} by {} (pools yes={} no={})",
                    receipt.bet.id,
                    amount,
                    side,
                    market_id,
                    user_id,
                    receipt.market.yes_pool,
                    receipt.market.no_pool
                );
                Ok(receipt)
            }
            Err(e) => {
                self.throttle.release(reservation);
                Err(e)
            }
        }
    }

    /// Debit, credit pool, insert bet, compensating on failure
    async fn apply(
        &self,
        user_id: &str,
        market_id: &str,
        side: Side,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> BettingResult<PlacementReceipt> {
        let store = self.store.as_ref();
        let mut saga = Saga::new(store, "place_bet");

        let new_balance = match store.try_debit_balance(user_id, amount).await {
            Ok(Some(balance)) => balance,
            Ok(None) => {
                // Spent concurrently since validation
                let balance = store
                    .get_user(user_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|u| u.balance)
                    .unwrap_or_default();
                return Err(BettingError::InsufficientFunds {
                    balance,
                    requested: amount,
                });
            }
            Err(e) => {
                error!("Balance debit failed for {}: {}", user_id, e);
                return Err(e.into());
            }
        };
        saga.applied(Undo::CreditBalance {
            user_id: user_id.to_string(),
            amount,
        });
        debug!("Debited {} from {}, balance now {}", amount, user_id, new_balance);

        let pools = match store.increment_pool(market_id, side, amount).await {
            Ok(Some(pools)) => pools,
            Ok(None) => {
                // Resolved concurrently since validation
                return Err(saga
                    .abort(BettingError::MarketClosed(market_id.to_string()))
                    .await);
            }
            Err(e) => {
                error!("Pool update failed for market {}: {}", market_id, e);
                return Err(saga.abort(e.into()).await);
            }
        };
        saga.applied(Undo::DecrementPool {
            market_id: market_id.to_string(),
            side,
            amount,
        });

        let new_bet = NewBet {
            market_id: market_id.to_string(),
            user_id: user_id.to_string(),
            side,
            amount,
            created_at: now,
        };
        let bet = match store.insert_bet(new_bet).await {
            Ok(Some(bet)) => bet,
            Ok(None) => {
                // Resolved between the pool increment and the insert
                return Err(saga
                    .abort(BettingError::MarketClosed(market_id.to_string()))
                    .await);
            }
            Err(e) => {
                error!("Bet insert failed for {} on {}: {}", user_id, market_id, e);
                return Err(saga.abort(e.into()).await);
            }
        };

        Ok(PlacementReceipt {
            bet,
            new_balance,
            market: pools,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{InMemoryLedger, StoreOp};
    use betting_core::{ErrorKind, Market, NewMarket, User};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    struct Harness {
        ledger: Arc<InMemoryLedger>,
        clock: Arc<ManualClock>,
        service: BetPlacementService,
    }

    async fn harness() -> Harness {
        let ledger = Arc::new(InMemoryLedger::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = BetPlacementService::new(
            ledger.clone(),
            clock.clone(),
            BettingConfig::default(),
        );

        ledger.insert_user(&User::new("alice", dec!(10))).await.unwrap();
        let market: Market = NewMarket {
            title: "Will it rain tomorrow?".to_string(),
            description: None,
            category: None,
            end_date: clock.now() + Duration::hours(1),
        }
        .into_market("m1".to_string(), "carol".to_string(), clock.now());
        ledger.insert_market(&market).await.unwrap();

        Harness {
            ledger,
            clock,
            service,
        }
    }

    fn intent(side: &str, amount: &str) -> BetIntent {
        BetIntent {
            market_id: "m1".to_string(),
            side: side.to_string(),
            amount: amount.to_string(),
        }
    }

    async fn balance(h: &Harness, user: &str) -> Decimal {
        h.ledger.get_user(user).await.unwrap().unwrap().balance
    }

    async fn pools(h: &Harness) -> PoolSnapshot {
        h.ledger.get_market("m1").await.unwrap().unwrap().pools
    }

    #[tokio::test]
    async fn test_bet_then_rapid_rebet() {
        let h = harness().await;

        let receipt = h.service.place_bet("alice", intent("yes", "5")).await.unwrap();
        assert_eq!(receipt.new_balance, dec!(5));
        assert_eq!(receipt.market, PoolSnapshot::new(dec!(5), dec!(0)));
        assert_eq!(receipt.bet.payout, None);

        h.clock.advance(Duration::milliseconds(1500));
        let err = h.service.place_bet("alice", intent("no", "5")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(balance(&h, "alice").await, dec!(5));
        assert_eq!(pools(&h).await.total_pool, dec!(5));
    }

    #[tokio::test]
    async fn test_rebet_after_window() {
        let h = harness().await;
        h.service.place_bet("alice", intent("yes", "2")).await.unwrap();

        h.clock.advance(Duration::seconds(2));
        let receipt = h.service.place_bet("alice", intent("no", "3")).await.unwrap();
        assert_eq!(receipt.new_balance, dec!(5));
        assert_eq!(receipt.market, PoolSnapshot::new(dec!(2), dec!(3)));
    }

    #[tokio::test]
    async fn test_amount_out_of_range_touches_nothing() {
        let h = harness().await;
        let err = h.service.place_bet("alice", intent("yes", "0.005")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmountOutOfRange);
        assert_eq!(balance(&h, "alice").await, dec!(10));
        assert_eq!(pools(&h).await, PoolSnapshot::default());
    }

    #[tokio::test]
    async fn test_validation_order() {
        let h = harness().await;

        // side is checked before amount
        let err = h.service.place_bet("alice", intent("maybe", "0")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        // balance is checked before market existence
        let mut missing_market = intent("yes", "50");
        missing_market.market_id = "nope".to_string();
        let err = h.service.place_bet("alice", missing_market.clone()).await.unwrap_err();
        assert_eq!(
            err,
            BettingError::InsufficientFunds {
                balance: dec!(10),
                requested: dec!(50)
            }
        );

        missing_market.amount = "1".to_string();
        let err = h.service.place_bet("alice", missing_market).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_expired_and_closed_markets() {
        let h = harness().await;

        h.clock.advance(Duration::hours(1));
        let err = h.service.place_bet("alice", intent("yes", "1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MarketExpired);

        h.ledger
            .set_market_resolved("m1", Side::Yes, h.clock.now())
            .await
            .unwrap();
        let err = h.service.place_bet("alice", intent("yes", "1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MarketClosed);
    }

    #[tokio::test]
    async fn test_pool_failure_restores_balance() {
        let h = harness().await;
        h.ledger.fail_next(StoreOp::IncrementPool, 1);

        let err = h.service.place_bet("alice", intent("yes", "4")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert_eq!(balance(&h, "alice").await, dec!(10));
        assert_eq!(pools(&h).await, PoolSnapshot::default());

        // a failed placement does not throttle the retry
        let receipt = h.service.place_bet("alice", intent("yes", "4")).await.unwrap();
        assert_eq!(receipt.new_balance, dec!(6));
    }

    #[tokio::test]
    async fn test_insert_failure_restores_balance_and_pool() {
        let h = harness().await;
        h.ledger.fail_next(StoreOp::InsertBet, 1);

        let err = h.service.place_bet("alice", intent("no", "4")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert_eq!(balance(&h, "alice").await, dec!(10));
        assert_eq!(pools(&h).await, PoolSnapshot::default());
        assert!(h.ledger.list_bets_for_market("m1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported() {
        let h = harness().await;
        h.ledger.fail_next(StoreOp::InsertBet, 1);
        h.ledger.fail_next(StoreOp::DecrementPool, 1);

        let err = h.service.place_bet("alice", intent("yes", "4")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert!(err.to_string().contains("manual reconciliation"));
        // the balance inverse still ran
        assert_eq!(balance(&h, "alice").await, dec!(10));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let h = harness().await;
        let err = h.service.place_bet("mallory", intent("yes", "1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_concurrent_bets_never_overdraw() {
        let h = harness().await;
        let service = Arc::new(h.service);
        for i in 0..10 {
            let market: Market = NewMarket {
                title: format!("Market {}", i),
                description: None,
                category: None,
                end_date: h.clock.now() + Duration::hours(1),
            }
            .into_market(format!("c{}", i), "carol".to_string(), h.clock.now());
            h.ledger.insert_market(&market).await.unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..10 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service
                    .place_bet(
                        "alice",
                        BetIntent {
                            market_id: format!("c{}", i),
                            side: "yes".to_string(),
                            amount: "3".to_string(),
                        },
                    )
                    .await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert_eq!(e.kind(), ErrorKind::InsufficientFunds),
            }
        }
        assert_eq!(accepted, 3);
        assert_eq!(
            h.ledger.get_user("alice").await.unwrap().unwrap().balance,
            dec!(1)
        );
    }
}
