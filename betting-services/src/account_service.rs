//! Bettor accounts

use betting_core::{BettingError, BettingResult, User};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::store::LedgerStore;
use crate::validation;

/// Service that opens and reads bettor accounts
pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    starting_balance: Decimal,
}

impl AccountService {
    pub fn new(store: Arc<dyn LedgerStore>, starting_balance: Decimal) -> Self {
        Self {
            store,
            starting_balance,
        }
    }

    /// Open an account for a verified identity, or return the existing one
    pub async fn open_account(&self, user_id: &str) -> BettingResult<User> {
        let user_id = validation::require_id("userId", user_id)?;
        let created = self
            .store
            .insert_user(&User::new(user_id, self.starting_balance))
            .await?;
        if created {
            info!("Opened account {} with balance {}", user_id, self.starting_balance);
        }
        self.get_account(user_id).await
    }

    pub async fn get_account(&self, user_id: &str) -> BettingResult<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| BettingError::not_found(format!("User {}", user_id)))
    }
}
