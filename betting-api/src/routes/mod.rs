//! API route definitions

mod accounts;
mod bets;
mod caller;
mod error;
mod health;
mod markets;
mod reconciliation;

use axum::Router;

use crate::AppState;

pub use caller::{CallerId, USER_ID_HEADER};
pub use error::ApiError;

/// Create all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(bets::routes())
        .merge(markets::routes())
        .merge(accounts::routes())
        .merge(reconciliation::routes())
        .merge(health::routes())
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use betting_services::{BettingConfig, InMemoryLedger, LedgerStore, ManualClock};
    use chrono::{DateTime, Utc};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::{build_router, AppState};

    pub struct TestApp {
        pub router: Router,
        pub ledger: Arc<InMemoryLedger>,
        pub clock: Arc<ManualClock>,
    }

    pub fn test_app() -> TestApp {
        let ledger = Arc::new(InMemoryLedger::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        let store: Arc<dyn LedgerStore> = ledger.clone();
        let state = AppState::new(store, clock.clone(), BettingConfig::default());

        TestApp {
            router: build_router(state),
            ledger,
            clock,
        }
    }

    pub async fn send(
        app: &TestApp,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header(super::USER_ID_HEADER, user);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}
