//! Market endpoints: creation, lookup, resolution and cleanup

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use betting_core::{Market, NewMarket};
use betting_services::ResolutionSummary;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiError, CallerId};
use crate::AppState;

/// Request to resolve a market
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// "yes" or "no"
    #[serde(default)]
    pub outcome: String,
}

/// Response for market cleanup
#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub kept: usize,
    pub deleted: usize,
}

/// Create market routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/markets", post(create_market))
        .route("/markets/cleanup", post(cleanup_markets))
        .route("/markets/{id}", get(get_market))
        .route("/markets/{id}/resolve", post(resolve_market))
}

/// Create a market owned by the caller
async fn create_market(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(request): Json<NewMarket>,
) -> Result<(StatusCode, Json<Market>), ApiError> {
    let market = state.markets.create_market(&user_id, request).await?;
    Ok((StatusCode::CREATED, Json(market)))
}

async fn get_market(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Market>, ApiError> {
    Ok(Json(state.markets.get_market(&id).await?))
}

/// Resolve a market; only its creator may do so, after its end date
async fn resolve_market(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolutionSummary>, ApiError> {
    let summary = state
        .resolution
        .resolve_market(&user_id, &id, &request.outcome)
        .await?;
    info!(
        "Market {} resolved {} by {}: {} distributed",
        id, summary.outcome, user_id, summary.total_distributed
    );
    Ok(Json(summary))
}

/// Delete the caller's markets beyond the most recent ones
async fn cleanup_markets(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<CleanupResponse>, ApiError> {
    let summary = state.cleanup.cleanup_markets(&user_id).await?;
    Ok(Json(CleanupResponse {
        success: true,
        kept: summary.kept,
        deleted: summary.deleted,
    }))
}
