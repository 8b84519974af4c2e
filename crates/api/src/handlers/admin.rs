//! Administrative session management.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tether_core::types::{DbId, SessionKey};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::RequireAdmin;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RevokeSessionsResponse {
    pub user_id: DbId,
    /// Sessions that were still active.
    pub revoked: u64,
}

/// POST /api/v1/admin/users/{id}/sessions/revoke
///
/// Revoke every session of a user in the administrator's own tenant.
pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    RequireAdmin(AuthUser(admin)): RequireAdmin,
    Path(user_id): Path<DbId>,
) -> AppResult<Json<RevokeSessionsResponse>> {
    let key = SessionKey::new(admin.tenant_id, user_id);
    let revoked = state.coordinator.revoke_user(key, admin.user_id).await?;
    Ok(Json(RevokeSessionsResponse { user_id, revoked }))
}
