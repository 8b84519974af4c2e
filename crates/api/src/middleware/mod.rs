//! Request extractors.
//!
//! - [`auth::AuthUser`] -- a request admitted by the request gate.
//! - [`rbac::RequireAdmin`] -- requires the session-revocation capability.
//! - [`client::ClientMeta`] -- client IP and user agent.

pub mod auth;
pub mod client;
pub mod rbac;
