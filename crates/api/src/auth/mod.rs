//! Authentication: tokens, credentials, the revocation registry, the
//! per-request gate and the login coordinator.
//!
//! - [`jwt`] -- HS256 access/refresh token issuing and verification.
//! - [`password`] -- Argon2id hashing and the password-change policy.
//! - [`credentials`] -- the credential verifier boundary.
//! - [`revocation`] -- expiring, capped token denylist.
//! - [`gate`] -- admits or rejects bearer tokens.
//! - [`login`] -- session lifecycle (login, refresh, logout, revoke).
//! - [`cookie`] -- the HttpOnly refresh-token cookie.

pub mod cookie;
pub mod credentials;
pub mod gate;
pub mod jwt;
pub mod login;
pub mod password;
pub mod revocation;
