//! Bettor accounts

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A bettor and their spendable balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,

    /// Never negative as a result of a placement
    pub balance: Decimal,
}

impl User {
    pub fn new(id: impl Into<UserId>, balance: Decimal) -> Self {
        Self {
            id: id.into(),
            balance,
        }
    }

    /// Whether the balance covers a stake of `amount`
    pub fn can_afford(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}
