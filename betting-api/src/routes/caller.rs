//! Caller identity
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user id in a header that is trusted as given.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller's user id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        Ok(CallerId(value.to_string()))
    }
}
