//! Well-known role name constants.
//!
//! These must match the values allowed by the `users.role` check constraint.

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_OPERATOR: &str = "operator";
pub const ROLE_VIEWER: &str = "viewer";

/// Returns `true` if the role may revoke other users' sessions.
pub fn can_revoke_sessions(role: &str) -> bool {
    role == ROLE_ADMIN
}
