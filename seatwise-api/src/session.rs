use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use seatwise_core::SeatFlowError;

use crate::error::AppError;
use crate::state::AppState;

pub const SESSION_HEADER: &str = "x-session-token";

/// Anonymous browsing session identifier; every checkout call requires one.
/// Lock ownership is keyed on this token, not on the (optional) user.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

impl FromRequestParts<AppState> for SessionToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Domain(SeatFlowError::Validation(
                    "missing X-Session-Token header".into(),
                ))
            })?;
        Ok(SessionToken(token.to_owned()))
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Optional authenticated user. Guests check out with just a session token;
/// a present-but-invalid bearer token is rejected rather than silently
/// downgraded to guest.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Option<i64>);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(header) = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        else {
            return Ok(AuthUser(None));
        };

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("malformed Authorization header".into()))?;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.auth.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AppError::Unauthorized("invalid token".into()))?;

        let user_id = data
            .claims
            .sub
            .parse::<i64>()
            .map_err(|_| AppError::Unauthorized("invalid token subject".into()))?;
        Ok(AuthUser(Some(user_id)))
    }
}
