//! Per-(user, market) bet throttle
//!
//! Enforces a minimum spacing between two bets by the same user on the same
//! market. The store's most recent bet is the durable source of truth; an
//! in-process reservation closes the window in which two concurrent
//! submissions would both see "no recent bet".

use betting_core::{MarketId, UserId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Prune stale reservations every this many checks
const PRUNE_EVERY: u64 = 1024;

/// A slot held by an in-flight placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    user_id: UserId,
    market_id: MarketId,
    at: DateTime<Utc>,
}

/// Throttle keyed by (user, market). Different markets never throttle each other.
#[derive(Debug)]
pub struct BetThrottle {
    window: Duration,
    /// Most recent accepted-or-in-flight bet time per key
    reservations: DashMap<(UserId, MarketId), DateTime<Utc>>,
    total_checks: AtomicU64,
    rejected_checks: AtomicU64,
}

impl BetThrottle {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(2)),
            reservations: DashMap::new(),
            total_checks: AtomicU64::new(0),
            rejected_checks: AtomicU64::new(0),
        }
    }

    /// Reserve a bet slot at `now`.
    ///
    /// `last_bet_at` is the creation time of the user's most recent stored bet
    /// on this market. Returns the remaining wait in milliseconds when the
    /// previous bet (stored or in flight) is younger than the window.
    pub fn try_reserve(
        &self,
        user_id: &str,
        market_id: &str,
        last_bet_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Reservation, u64> {
        let check_num = self.total_checks.fetch_add(1, Ordering::Relaxed) + 1;
        if check_num % PRUNE_EVERY == 0 {
            self.prune(now);
        }

        let key = (user_id.to_string(), market_id.to_string());
        let mut slot = self.reservations.entry(key).or_insert(DateTime::<Utc>::MIN_UTC);

        let latest = match last_bet_at {
            Some(stored) if stored > *slot => stored,
            _ => *slot,
        };

        let age = now.signed_duration_since(latest);
        if age < self.window {
            self.rejected_checks.fetch_add(1, Ordering::Relaxed);
            let wait_ms = (self.window - age).num_milliseconds().max(1) as u64;
            debug!(
                "[THROTTLE] #{} {} on {} rejected, {}ms remaining",
                check_num, user_id, market_id, wait_ms
            );
            return Err(wait_ms);
        }

        *slot = now;
        Ok(Reservation {
            user_id: user_id.to_string(),
            market_id: market_id.to_string(),
            at: now,
        })
    }

    /// Give back a reservation whose placement did not complete
    pub fn release(&self, reservation: Reservation) {
        let key = (reservation.user_id, reservation.market_id);
        self.reservations
            .remove_if(&key, |_, at| *at == reservation.at);
    }

    /// Drop reservations older than the window
    pub fn prune(&self, now: DateTime<Utc>) {
        let window = self.window;
        self.reservations
            .retain(|_, at| now.signed_duration_since(*at) < window);
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            rejected_checks: self.rejected_checks.load(Ordering::Relaxed),
            tracked_keys: self.reservations.len(),
        }
    }
}

/// Statistics about throttle usage
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleStats {
    pub total_checks: u64,
    pub rejected_checks: u64,
    pub tracked_keys: usize,
}
