//! Bearer-token authentication extractor.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use tether_core::error::AuthFailure;

use crate::auth::gate::AuthSession;
use crate::error::AppError;
use crate::state::AppState;

/// A request admitted by the [`RequestGate`](crate::auth::gate::RequestGate).
///
/// ```ignore
/// async fn my_handler(AuthUser(session): AuthUser) -> AppResult<Json<()>> {
///     tracing::info!(user_id = session.user_id, role = %session.role, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthSession);

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::auth(AuthFailure::MissingToken))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::auth(AuthFailure::TokenInvalid))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let session = state.gate.admit(token).await?;
        Ok(AuthUser(session))
    }
}
