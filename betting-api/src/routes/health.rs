//! Health check endpoints

use axum::{extract::State, response::Json, routing::get, Router};
use betting_services::ThrottleStats;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    /// Credits waiting for reconciliation, if the ledger could be read
    pending_credits: Option<usize>,
    throttle: ThrottleStats,
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let pending = state.reconciliation.list_pending().await.ok().map(|p| p.len());

    let status = match pending {
        Some(0) => "healthy",
        _ => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        pending_credits: pending,
        throttle: state.placement.throttle_stats(),
    })
}

/// Simple liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
}
