//! Bearer token authentication.

use axum::extract::{Request, State};
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use super::ApiState;
use crate::error::ApiError;

/// Pull the token out of `Bearer <token>`.
pub(crate) fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve `Authorization: Bearer <api_token>` to a [`User`](crate::types::User)
/// and insert it into the request extensions.
pub async fn require_auth(
    State(state): State<ApiState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if req.method() == Method::OPTIONS {
        return Ok(next.run(req).await);
    }

    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match header_value {
        Some(value) => bearer_token(value).ok_or_else(|| {
            warn!(uri = %req.uri(), "Malformed authorization header");
            ApiError::unauthorized("Invalid authorization header")
        })?,
        None => {
            warn!(uri = %req.uri(), "Missing authorization header");
            return Err(ApiError::unauthorized(
                "Authentication credentials were not provided",
            ));
        }
    };

    match state.db().get_user_by_token(token)? {
        Some(user) => {
            req.extensions_mut().insert(user);
            Ok(next.run(req).await)
        }
        None => {
            warn!(uri = %req.uri(), "Unknown API token");
            Err(ApiError::unauthorized("Invalid token"))
        }
    }
}
