//! Mapping of engine errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use betting_core::{BettingError, ErrorKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::error;

/// Error returned by every handler
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Betting(#[from] BettingError),
}

/// Error response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_balance: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput
        | ErrorKind::AmountOutOfRange
        | ErrorKind::InsufficientFunds
        | ErrorKind::MarketClosed
        | ErrorKind::MarketExpired
        | ErrorKind::AlreadyResolved
        | ErrorKind::NotYetEnded => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::StorageFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::Unauthorized => {
                let body = ErrorResponse {
                    error: "Unauthorized".to_string(),
                    kind: None,
                    current_balance: None,
                    ends_at: None,
                };
                return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
            }
            ApiError::Betting(err) => err,
        };

        let kind = err.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!("Request failed: {}", err);
        }

        let current_balance = match &err {
            BettingError::InsufficientFunds { balance, .. } => Some(*balance),
            _ => None,
        };
        let ends_at = match &err {
            BettingError::NotYetEnded { ends_at, .. } => Some(*ends_at),
            _ => None,
        };

        let body = ErrorResponse {
            error: err.to_string(),
            kind: Some(kind),
            current_balance,
            ends_at,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::AlreadyResolved), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            status_for(ErrorKind::StorageFailure),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
