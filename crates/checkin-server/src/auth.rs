//! Bearer Token Authentication

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use checkin_identity::{EmailFingerprint, IdentityError};

use crate::error::ApiError;
use crate::state::AppState;

/// Verified caller of a protected endpoint
#[derive(Clone, Debug)]
pub struct Caller {
    /// Normalized email from the token
    pub email: String,
    pub fingerprint: EmailFingerprint,
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(IdentityError::Unauthorized)?;

        let email = state.tokens.validate_token(token)?;

        Ok(Self {
            fingerprint: EmailFingerprint::of(&email),
            email,
        })
    }
}
