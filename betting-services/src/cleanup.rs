//! Market cleanup
//!
//! Keeps a creator's most recent markets and deletes the rest along with
//! their bets and chat messages.

use betting_core::{BettingResult, MarketId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::store::LedgerStore;
use crate::validation;

/// Result of a cleanup
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub kept: usize,
    pub deleted: usize,
}

/// Service that prunes a creator's older markets
pub struct CleanupService {
    store: Arc<dyn LedgerStore>,
    keep: usize,
}

impl CleanupService {
    pub fn new(store: Arc<dyn LedgerStore>, keep: usize) -> Self {
        Self { store, keep }
    }

    /// Delete every market of `creator_id` beyond the `keep` most recent
    #[instrument(skip(self))]
    pub async fn cleanup_markets(&self, creator_id: &str) -> BettingResult<CleanupSummary> {
        let creator_id = validation::require_id("userId", creator_id)?;
        let markets = self.store.list_markets_by_creator(creator_id).await?;

        if markets.len() <= self.keep {
            return Ok(CleanupSummary {
                kept: markets.len(),
                deleted: 0,
            });
        }

        let doomed: Vec<MarketId> = markets
            .into_iter()
            .skip(self.keep)
            .map(|m| m.id)
            .collect();
        let deleted = self.store.delete_markets(&doomed).await?;
        info!("Cleanup for {}: kept {}, deleted {}", creator_id, self.keep, deleted);

        Ok(CleanupSummary {
            kept: self.keep,
            deleted,
        })
    }
}
