//! Capability extractors built on [`AuthUser`].

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tether_core::error::CoreError;
use tether_core::roles::can_revoke_sessions;

use super::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// Requires a role allowed to revoke other users' sessions. Rejects with
/// 403 Forbidden otherwise.
///
/// ```ignore
/// async fn admin_only(RequireAdmin(user): RequireAdmin) -> AppResult<Json<()>> {
///     Ok(Json(()))
/// }
/// ```
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !can_revoke_sessions(&user.0.role) {
            return Err(AppError::Core(CoreError::Forbidden(
                "Admin role required".into(),
            )));
        }
        Ok(RequireAdmin(user))
    }
}
