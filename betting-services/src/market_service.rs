//! Market creation and lookup

use betting_core::{BettingError, BettingResult, Market, NewMarket};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::store::LedgerStore;
use crate::validation;

/// Service for creating and reading markets
pub struct MarketService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl MarketService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create an active market with empty pools, owned by `creator_id`
    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn create_market(&self, creator_id: &str, request: NewMarket) -> BettingResult<Market> {
        let creator_id = validation::require_id("userId", creator_id)?;

        let title = request.title.trim();
        if title.is_empty() {
            return Err(BettingError::invalid_input("Market title is required"));
        }
        let now = self.clock.now();
        if request.end_date <= now {
            return Err(BettingError::invalid_input(format!(
                "End date {} must be in the future",
                request.end_date
            )));
        }

        let request = NewMarket {
            title: title.to_string(),
            description: non_blank(request.description),
            category: non_blank(request.category),
            end_date: request.end_date,
        };
        let market = request.into_market(Uuid::new_v4().to_string(), creator_id.to_string(), now);
        self.store.insert_market(&market).await?;

        info!("Market {} created by {}", market.id, creator_id);
        Ok(market)
    }

    pub async fn get_market(&self, market_id: &str) -> BettingResult<Market> {
        self.store
            .get_market(market_id)
            .await?
            .ok_or_else(|| BettingError::not_found(format!("Market {}", market_id)))
    }

    /// Markets created by `creator_id`, newest first
    pub async fn list_markets_by_creator(&self, creator_id: &str) -> BettingResult<Vec<Market>> {
        Ok(self.store.list_markets_by_creator(creator_id).await?)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::InMemoryLedger;
    use betting_core::{ErrorKind, MarketStatus, PoolSnapshot};
    use chrono::{Duration, Utc};

    fn service() -> MarketService {
        MarketService::new(Arc::new(InMemoryLedger::new()), Arc::new(SystemClock))
    }

    fn request(title: &str, end_in: Duration) -> NewMarket {
        NewMarket {
            title: title.to_string(),
            description: Some("  ".to_string()),
            category: Some("Crypto".to_string()),
            end_date: Utc::now() + end_in,
        }
    }

    #[tokio::test]
    async fn test_create_market() {
        let service = service();
        let market = service
            .create_market("carol", request("  BTC above 100k?  ", Duration::days(1)))
            .await
            .unwrap();

        assert_eq!(market.title, "BTC above 100k?");
        assert_eq!(market.description, None);
        assert_eq!(market.status, MarketStatus::Active);
        assert_eq!(market.pools, PoolSnapshot::default());
        assert_eq!(market.created_by, "carol");

        let fetched = service.get_market(&market.id).await.unwrap();
        assert_eq!(fetched, market);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let service = service();
        let err = service
            .create_market("carol", request("   ", Duration::days(1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = service
            .create_market("carol", request("Past", Duration::days(-1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_get_missing_market() {
        let err = service().get_market("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
