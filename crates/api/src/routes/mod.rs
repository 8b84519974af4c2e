pub mod admin;
pub mod auth;
pub mod health;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws                                   WebSocket
///
/// /auth/login                           login (public)
/// /auth/refresh                         refresh (bearer + refresh cookie)
/// /auth/logout                          logout (requires auth)
/// /auth/session                         current session (requires auth)
///
/// /admin/users/{id}/sessions/revoke     revoke a user's sessions (admin only)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/auth", auth::router())
        .nest("/admin", admin::router())
}
