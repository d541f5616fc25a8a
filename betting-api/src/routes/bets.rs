//! Bet placement endpoint

use axum::{extract::State, routing::post, Json, Router};
use betting_core::{BettingError, PoolSnapshot};
use betting_services::BetIntent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ApiError, CallerId};
use crate::AppState;

/// Request to place a bet
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetRequest {
    #[serde(default)]
    pub market_id: String,
    /// "yes" or "no"
    #[serde(default, alias = "betType")]
    pub side: String,
    /// JSON number or decimal string
    #[serde(default)]
    pub amount: Value,
}

/// Response for an accepted bet
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetResponse {
    pub success: bool,
    pub bet_id: String,
    pub new_balance: Decimal,
    pub market: PoolSnapshot,
    pub message: String,
}

/// Create bet routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/bets", post(place_bet))
}

/// Numbers are kept in their JSON text form so no precision is lost
fn amount_text(amount: &Value) -> Result<String, BettingError> {
    match amount {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Null => Err(BettingError::invalid_input("amount is required")),
        other => Err(BettingError::invalid_input(format!(
            "amount must be a number, got {}",
            other
        ))),
    }
}

/// Place a bet for the caller
async fn place_bet(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(request): Json<PlaceBetRequest>,
) -> Result<Json<PlaceBetResponse>, ApiError> {
    let intent = BetIntent {
        market_id: request.market_id,
        side: request.side,
        amount: amount_text(&request.amount)?,
    };

    let receipt = state.placement.place_bet(&user_id, intent).await?;
    info!(
        "Bet {} placed by {}: {} on {}",
        receipt.bet.id, user_id, receipt.bet.amount, receipt.bet.side
    );

    Ok(Json(PlaceBetResponse {
        success: true,
        message: format!(
            "Bet of {} placed on {}",
            receipt.bet.amount,
            receipt.bet.side.as_str().to_uppercase()
        ),
        bet_id: receipt.bet.id,
        new_balance: receipt.new_balance,
        market: receipt.market,
    }))
}
