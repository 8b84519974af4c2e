use axum::routing::post;
use axum::Router;

use crate::handlers::admin;
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// ```text
/// POST /users/{id}/sessions/revoke  -> revoke_user_sessions
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/users/{id}/sessions/revoke",
        post(admin::revoke_user_sessions),
    )
}
