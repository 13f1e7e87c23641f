//! Bearer-secret authentication for server-to-server routes.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

/// Proof that the request carried the shared worker secret.
#[derive(Debug, Clone, Copy)]
pub struct WorkerAuth;

#[axum::async_trait]
impl FromRequestParts<AppState> for WorkerAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::unauthorized("Missing or malformed Authorization header"))?;

        if !state.secret.verify(bearer.token()) {
            warn!(path = %parts.uri.path(), "Rejected request with invalid worker secret");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }

        Ok(WorkerAuth)
    }
}
