//! Market data structures for pari-mutuel markets

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::side::Side;
use crate::{MarketId, UserId};

/// Status of a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    /// Market accepts bets until its end date
    #[default]
    Active,
    /// Outcome declared and funds distributed. Terminal.
    Resolved,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Active => "active",
            MarketStatus::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for MarketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MarketStatus::Active),
            "resolved" => Ok(MarketStatus::Resolved),
            _ => Err(format!("Unknown market status: {}", s)),
        }
    }
}

/// Pool sizes of a market at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub yes_pool: Decimal,
    pub no_pool: Decimal,
    pub total_pool: Decimal,
}

impl PoolSnapshot {
    /// Snapshot from the two side pools; the total is always derived
    pub fn new(yes_pool: Decimal, no_pool: Decimal) -> Self {
        Self {
            yes_pool,
            no_pool,
            total_pool: yes_pool + no_pool,
        }
    }

    /// Pool staked on `side`
    pub fn pool_for(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.yes_pool,
            Side::No => self.no_pool,
        }
    }

    /// Snapshot after adding `delta` to one side (negative for compensation)
    pub fn adjusted(&self, side: Side, delta: Decimal) -> Self {
        match side {
            Side::Yes => Self::new(self.yes_pool + delta, self.no_pool),
            Side::No => Self::new(self.yes_pool, self.no_pool + delta),
        }
    }
}

/// A binary yes/no market with pari-mutuel pools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: MarketId,

    /// Human-readable question
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Category (e.g., "Crypto", "Sports")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub status: MarketStatus,

    /// Current pools. Frozen once the market is resolved.
    #[serde(flatten)]
    pub pools: PoolSnapshot,

    /// No bets are accepted at or after this instant, and resolution is blocked before it
    pub end_date: DateTime<Utc>,

    /// Only the creator may resolve the market
    pub created_by: UserId,

    pub created_at: DateTime<Utc>,

    /// Set exactly once, at resolution
    pub outcome: Option<Side>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Market {
    /// Pool staked on `side`
    pub fn pool_for(&self, side: Side) -> Decimal {
        self.pools.pool_for(side)
    }

    /// Whether the market's end date has been reached at `now`
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_date <= now
    }

    /// Whether a bet may be placed at `now`
    pub fn accepts_bets(&self, now: DateTime<Utc>) -> bool {
        self.status == MarketStatus::Active && !self.has_ended(now)
    }

    pub fn is_resolved(&self) -> bool {
        self.status == MarketStatus::Resolved
    }
}

/// Fields supplied when creating a market; pools start at zero
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMarket {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub end_date: DateTime<Utc>,
}

impl NewMarket {
    /// Materialize into an active market with empty pools
    pub fn into_market(
        self,
        id: MarketId,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Market {
        Market {
            id,
            title: self.title,
            description: self.description,
            category: self.category,
            status: MarketStatus::Active,
            pools: PoolSnapshot::default(),
            end_date: self.end_date,
            created_by,
            created_at,
            outcome: None,
            resolved_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sample_market(end_date: DateTime<Utc>) -> Market {
        NewMarket {
            title: "Will it rain?".to_string(),
            description: None,
            category: Some("Weather".to_string()),
            end_date,
        }
        .into_market("m1".to_string(), "creator".to_string(), Utc::now())
    }

    #[test]
    fn test_new_market_starts_empty_and_active() {
        let market = sample_market(Utc::now() + Duration::hours(1));
        assert_eq!(market.status, MarketStatus::Active);
        assert_eq!(market.pools, PoolSnapshot::new(dec!(0), dec!(0)));
        assert!(market.outcome.is_none());
    }

    #[test]
    fn test_adjusted_keeps_total_consistent() {
        let pools = PoolSnapshot::new(dec!(30), dec!(70));
        let after = pools.adjusted(Side::Yes, dec!(5));
        assert_eq!(after.yes_pool, dec!(35));
        assert_eq!(after.no_pool, dec!(70));
        assert_eq!(after.total_pool, dec!(105));

        let undone = after.adjusted(Side::Yes, dec!(-5));
        assert_eq!(undone, pools);
    }

    #[test]
    fn test_end_date_boundary() {
        let now = Utc::now();
        let market = sample_market(now);
        // end_date <= now counts as ended
        assert!(market.has_ended(now));
        assert!(!market.accepts_bets(now));
        assert!(market.accepts_bets(now - Duration::seconds(1)));
    }

    #[test]
    fn test_serializes_flat_pools() {
        let market = sample_market(Utc::now());
        let json = serde_json::to_value(&market).unwrap();
        assert!(json.get("yesPool").is_some());
        assert!(json.get("totalPool").is_some());
        assert_eq!(json["status"], "active");
    }
}
