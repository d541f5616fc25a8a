//! In-memory ledger
//!
//! Each table is a `DashMap`; holding an entry's write guard for the whole
//! read-modify-write gives the same per-row atomicity a database row lock
//! would. Failures can be injected per operation to exercise compensation.

use async_trait::async_trait;
use betting_core::{Bet, Market, MarketId, MarketStatus, NewBet, PoolSnapshot, Side, User};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::{LedgerStore, PendingCredit, StoreError, StoreOp};

/// Ledger kept entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    users: DashMap<String, User>,
    markets: DashMap<String, Market>,
    /// Bets tagged with an insertion sequence number for stable ordering
    bets: DashMap<String, (u64, Bet)>,
    pending: DashMap<String, (u64, PendingCredit)>,
    seq: AtomicU64,
    faults: Mutex<HashMap<StoreOp, usize>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail with `StoreError::Injected`
    pub fn fail_next(&self, op: StoreOp, times: usize) {
        self.faults.lock().insert(op, times);
    }

    /// Clear all injected failures
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        let mut faults = self.faults.lock();
        match faults.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Injected(op))
            }
            _ => Ok(()),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn missing(table: &'static str, id: &str) -> StoreError {
        StoreError::Missing {
            table,
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.check(StoreOp::GetUser)?;
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn insert_user(&self, user: &User) -> Result<bool, StoreError> {
        self.check(StoreOp::InsertUser)?;
        let mut inserted = false;
        self.users.entry(user.id.clone()).or_insert_with(|| {
            inserted = true;
            user.clone()
        });
        Ok(inserted)
    }

    async fn set_user_balance(&self, id: &str, balance: Decimal) -> Result<(), StoreError> {
        self.check(StoreOp::SetUserBalance)?;
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| Self::missing("users", id))?;
        user.balance = balance;
        Ok(())
    }

    async fn try_debit_balance(
        &self,
        id: &str,
        amount: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        self.check(StoreOp::DebitBalance)?;
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| Self::missing("users", id))?;
        if user.balance < amount {
            return Ok(None);
        }
        user.balance -= amount;
        Ok(Some(user.balance))
    }

    async fn credit_balance(&self, id: &str, amount: Decimal) -> Result<Decimal, StoreError> {
        self.check(StoreOp::CreditBalance)?;
        let mut user = self
            .users
            .get_mut(id)
            .ok_or_else(|| Self::missing("users", id))?;
        user.balance += amount;
        Ok(user.balance)
    }

    async fn get_market(&self, id: &str) -> Result<Option<Market>, StoreError> {
        self.check(StoreOp::GetMarket)?;
        Ok(self.markets.get(id).map(|m| m.clone()))
    }

    async fn insert_market(&self, market: &Market) -> Result<(), StoreError> {
        self.check(StoreOp::InsertMarket)?;
        self.markets.insert(market.id.clone(), market.clone());
        Ok(())
    }

    async fn set_market_pools(&self, id: &str, pools: PoolSnapshot) -> Result<(), StoreError> {
        self.check(StoreOp::SetMarketPools)?;
        let mut market = self
            .markets
            .get_mut(id)
            .ok_or_else(|| Self::missing("markets", id))?;
        market.pools = PoolSnapshot::new(pools.yes_pool, pools.no_pool);
        Ok(())
    }

    async fn increment_pool(
        &self,
        id: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<Option<PoolSnapshot>, StoreError> {
        self.check(StoreOp::IncrementPool)?;
        let mut market = self
            .markets
            .get_mut(id)
            .ok_or_else(|| Self::missing("markets", id))?;
        if market.status != MarketStatus::Active {
            return Ok(None);
        }
        market.pools = market.pools.adjusted(side, amount);
        Ok(Some(market.pools))
    }

    async fn decrement_pool(
        &self,
        id: &str,
        side: Side,
        amount: Decimal,
    ) -> Result<PoolSnapshot, StoreError> {
        self.check(StoreOp::DecrementPool)?;
        let mut market = self
            .markets
            .get_mut(id)
            .ok_or_else(|| Self::missing("markets", id))?;
        market.pools = market.pools.adjusted(side, -amount);
        Ok(market.pools)
    }

    async fn set_market_resolved(
        &self,
        id: &str,
        outcome: Side,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<Market>, StoreError> {
        self.check(StoreOp::SetMarketResolved)?;
        let mut market = self
            .markets
            .get_mut(id)
            .ok_or_else(|| Self::missing("markets", id))?;
        if market.status == MarketStatus::Resolved {
            return Ok(None);
        }
        market.status = MarketStatus::Resolved;
        market.outcome = Some(outcome);
        market.resolved_at = Some(resolved_at);
        Ok(Some(market.clone()))
    }

    async fn list_markets_by_creator(&self, user: &str) -> Result<Vec<Market>, StoreError> {
        self.check(StoreOp::ListMarketsByCreator)?;
        let mut markets: Vec<Market> = self
            .markets
            .iter()
            .filter(|m| m.created_by == user)
            .map(|m| m.clone())
            .collect();
        markets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(markets)
    }

    async fn delete_markets(&self, ids: &[MarketId]) -> Result<usize, StoreError> {
        self.check(StoreOp::DeleteMarkets)?;
        self.bets.retain(|_, (_, bet)| !ids.contains(&bet.market_id));
        let removed = ids
            .iter()
            .filter(|id| self.markets.remove(id.as_str()).is_some())
            .count();
        Ok(removed)
    }

    async fn get_most_recent_bet(
        &self,
        user: &str,
        market: &str,
    ) -> Result<Option<Bet>, StoreError> {
        self.check(StoreOp::GetMostRecentBet)?;
        let latest = self
            .bets
            .iter()
            .filter(|entry| entry.1.user_id == user && entry.1.market_id == market)
            .max_by_key(|entry| (entry.1.created_at, entry.0))
            .map(|entry| entry.1.clone());
        Ok(latest)
    }

    async fn insert_bet(&self, bet: NewBet) -> Result<Option<Bet>, StoreError> {
        self.check(StoreOp::InsertBet)?;
        // Held until the bet is stored so a resolution claim cannot slip in between
        let market = self
            .markets
            .get(&bet.market_id)
            .ok_or_else(|| Self::missing("markets", &bet.market_id))?;
        if market.status != MarketStatus::Active {
            return Ok(None);
        }
        let bet = bet.into_bet(Uuid::new_v4().to_string());
        self.bets
            .insert(bet.id.clone(), (self.next_seq(), bet.clone()));
        drop(market);
        Ok(Some(bet))
    }

    async fn list_bets_for_market(&self, market: &str) -> Result<Vec<Bet>, StoreError> {
        self.check(StoreOp::ListBets)?;
        let mut bets: Vec<(u64, Bet)> = self
            .bets
            .iter()
            .filter(|entry| entry.1.market_id == market)
            .map(|entry| entry.value().clone())
            .collect();
        bets.sort_by_key(|(seq, _)| *seq);
        Ok(bets.into_iter().map(|(_, bet)| bet).collect())
    }

    async fn set_bet_payout(&self, bet: &str, payout: Decimal) -> Result<(), StoreError> {
        self.check(StoreOp::SetBetPayout)?;
        let mut entry = self
            .bets
            .get_mut(bet)
            .ok_or_else(|| Self::missing("bets", bet))?;
        entry.1.payout = Some(payout);
        Ok(())
    }

    async fn record_pending_credit(&self, credit: &PendingCredit) -> Result<(), StoreError> {
        self.check(StoreOp::RecordPendingCredit)?;
        self.pending
            .insert(credit.id.clone(), (self.next_seq(), credit.clone()));
        Ok(())
    }

    async fn list_pending_credits(&self) -> Result<Vec<PendingCredit>, StoreError> {
        self.check(StoreOp::ListPendingCredits)?;
        let mut pending: Vec<(u64, PendingCredit)> =
            self.pending.iter().map(|e| e.value().clone()).collect();
        pending.sort_by_key(|(seq, _)| *seq);
        Ok(pending.into_iter().map(|(_, credit)| credit).collect())
    }

    async fn remove_pending_credit(&self, id: &str) -> Result<(), StoreError> {
        self.check(StoreOp::RemovePendingCredit)?;
        self.pending.remove(id);
        Ok(())
    }

    async fn bump_pending_credit(
        &self,
        id: &str,
        balance_credited: bool,
    ) -> Result<(), StoreError> {
        self.check(StoreOp::BumpPendingCredit)?;
        let mut entry = self
            .pending
            .get_mut(id)
            .ok_or_else(|| Self::missing("pending_credits", id))?;
        entry.1.attempts += 1;
        entry.1.balance_credited |= balance_credited;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_debit_refuses_overdraft() {
        let ledger = InMemoryLedger::new();
        ledger.insert_user(&User::new("alice", dec!(10))).await.unwrap();

        assert_eq!(
            ledger.try_debit_balance("alice", dec!(11)).await.unwrap(),
            None
        );
        assert_eq!(
            ledger.try_debit_balance("alice", dec!(10)).await.unwrap(),
            Some(dec!(0))
        );
    }

    #[tokio::test]
    async fn test_insert_user_keeps_existing() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.insert_user(&User::new("bob", dec!(5))).await.unwrap());
        assert!(!ledger.insert_user(&User::new("bob", dec!(500))).await.unwrap());
        assert_eq!(ledger.get_user("bob").await.unwrap().unwrap().balance, dec!(5));
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next(StoreOp::GetUser, 1);
        assert!(matches!(
            ledger.get_user("x").await,
            Err(StoreError::Injected(StoreOp::GetUser))
        ));
        assert!(ledger.get_user("x").await.unwrap().is_none());
    }

    fn market(id: &str) -> Market {
        betting_core::NewMarket {
            title: "Will the ferry run?".to_string(),
            description: None,
            category: None,
            end_date: Utc::now() + chrono::Duration::hours(1),
        }
        .into_market(id.to_string(), "carol".to_string(), Utc::now())
    }

    fn bet_on(market: &str) -> NewBet {
        NewBet {
            market_id: market.to_string(),
            user_id: "bob".to_string(),
            side: Side::No,
            amount: dec!(2),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_bet_insert_needs_active_market() {
        let ledger = InMemoryLedger::new();
        ledger.insert_market(&market("m1")).await.unwrap();

        assert!(ledger.insert_bet(bet_on("m1")).await.unwrap().is_some());
        ledger
            .set_market_resolved("m1", Side::No, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(ledger.insert_bet(bet_on("m1")).await.unwrap().is_none());
        assert_eq!(ledger.list_bets_for_market("m1").await.unwrap().len(), 1);

        assert!(matches!(
            ledger.insert_bet(bet_on("m2")).await,
            Err(StoreError::Missing { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_market_pools_derives_total() {
        let ledger = InMemoryLedger::new();
        ledger.insert_market(&market("m1")).await.unwrap();

        // total is recomputed rather than trusted
        let mut pools = PoolSnapshot::new(dec!(3), dec!(7));
        pools.total_pool = dec!(99);
        ledger.set_market_pools("m1", pools).await.unwrap();
        let stored = ledger.get_market("m1").await.unwrap().unwrap();
        assert_eq!(stored.pools, PoolSnapshot::new(dec!(3), dec!(7)));
        assert_eq!(stored.pools.total_pool, dec!(10));

        assert!(matches!(
            ledger.set_market_pools("m2", PoolSnapshot::default()).await,
            Err(StoreError::Missing { .. })
        ));
    }
}
