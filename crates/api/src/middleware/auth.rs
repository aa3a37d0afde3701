//! The [`AuthUser`] extractor.

use atelier_core::error::CoreError;
use atelier_core::types::UserId;
use axum::extract::{FromRequestParts, Query};
use axum::http::header::{AUTHORIZATION, UPGRADE};
use axum::http::request::Parts;
use serde::Deserialize;

use crate::auth::jwt::TokenError;
use crate::error::AppError;
use crate::state::AppState;

/// The caller, identified by a verified bearer token.
///
/// Browsers cannot set headers on a WebSocket handshake, so upgrade
/// requests may pass the token as `?access_token=` instead. Plain HTTP
/// requests must use the `Authorization` header.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: UserId,
}

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

fn unauthorized(message: &str) -> AppError {
    AppError::Core(CoreError::Unauthorized(message.to_string()))
}

fn is_websocket_upgrade(parts: &Parts) -> bool {
    parts
        .headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn bearer_token(parts: &Parts) -> Result<String, AppError> {
    if let Some(header) = parts.headers.get(AUTHORIZATION) {
        let header = header
            .to_str()
            .map_err(|_| unauthorized("Malformed Authorization header"))?;
        return header
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .ok_or_else(|| unauthorized("Expected: Authorization: Bearer <token>"));
    }

    if is_websocket_upgrade(parts) {
        if let Ok(Query(TokenQuery {
            access_token: Some(token),
        })) = Query::<TokenQuery>::try_from_uri(&parts.uri)
        {
            return Ok(token);
        }
    }

    Err(unauthorized("Missing bearer token"))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = state.tokens.verify(&token).map_err(|e| match e {
            TokenError::Expired => unauthorized("Token expired"),
            TokenError::Invalid(err) => {
                tracing::debug!(error = %err, "Rejected bearer token");
                unauthorized("Invalid token")
            }
        })?;

        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}
