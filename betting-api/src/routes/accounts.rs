//! Account endpoints

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use betting_core::User;

use super::{ApiError, CallerId};
use crate::AppState;

/// Create account routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(open_account))
        .route("/accounts/me", get(get_account))
}

/// Open the caller's account with the starting balance, or return the existing one
async fn open_account(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.accounts.open_account(&user_id).await?))
}

async fn get_account(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.accounts.get_account(&user_id).await?))
}
