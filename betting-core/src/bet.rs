//! Bet records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::side::Side;
use crate::{BetId, MarketId, UserId};

/// A stake on one side of a market
///
/// Immutable once created, apart from the single `payout` write made when a
/// winning bet is settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub id: BetId,
    pub market_id: MarketId,
    pub user_id: UserId,
    pub side: Side,

    /// Always positive
    pub amount: Decimal,

    /// Stake plus share of the losing pool. Only set on winning bets.
    pub payout: Option<Decimal>,

    pub created_at: DateTime<Utc>,
}

impl Bet {
    /// Whether this bet is on the winning side of `outcome`
    pub fn is_winner(&self, outcome: Side) -> bool {
        self.side == outcome
    }
}

/// Fields supplied when inserting a bet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBet {
    pub market_id: MarketId,
    pub user_id: UserId,
    pub side: Side,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl NewBet {
    /// Materialize into a bet with no payout
    pub fn into_bet(self, id: BetId) -> Bet {
        Bet {
            id,
            market_id: self.market_id,
            user_id: self.user_id,
            side: self.side,
            amount: self.amount,
            payout: None,
            created_at: self.created_at,
        }
    }
}
