use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::AppState;
use crate::auth::{SessionClaims, TokenError};
use crate::error::IngestError;

/// Verifies the `Authorization: Bearer` session token before any other
/// extractor touches the request.
#[async_trait]
impl FromRequestParts<AppState> for SessionClaims {
    type Rejection = IngestError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| TokenError::Malformed("missing bearer token".to_string()))?;

        Ok(state.signer.verify(token)?)
    }
}
