//! Reconciliation endpoints for credits that failed during resolution

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use betting_services::{PendingCredit, ReconciliationReport};
use serde::Serialize;
use tracing::info;

use super::{ApiError, CallerId};
use crate::AppState;

/// Response for listing pending credits
#[derive(Debug, Serialize)]
pub struct PendingCreditsResponse {
    pub credits: Vec<PendingCredit>,
    pub count: usize,
}

/// Create reconciliation routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reconciliation", get(list_pending))
        .route("/reconciliation/retry", post(retry_pending))
}

/// Credits still owed to the caller
async fn list_pending(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<PendingCreditsResponse>, ApiError> {
    let credits = state.reconciliation.list_pending_for(&user_id).await?;
    Ok(Json(PendingCreditsResponse {
        count: credits.len(),
        credits,
    }))
}

/// Retry every queued credit once
async fn retry_pending(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<ReconciliationReport>, ApiError> {
    let report = state.reconciliation.retry_pending().await?;
    info!(
        "Reconciliation requested by {}: {} attempted, {} settled, {} still pending",
        user_id, report.attempted, report.settled, report.still_pending
    );
    Ok(Json(report))
}
