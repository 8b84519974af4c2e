//! Session store: the single source of truth for "is this login still valid".
//!
//! The login path needs "mark every prior session of a (tenant, user)
//! obsolete, then insert exactly one new one" as one atomic unit, and needs
//! concurrent logins for the same account to surface as a distinguishable
//! [`StoreError::Conflict`] rather than silently interleaving.
//!
//! - [`postgres::PgSessionStore`] -- production store (READ COMMITTED, a
//!   per-key advisory lock and the `uq_user_sessions_active` partial
//!   unique index).
//! - [`memory::MemorySessionStore`] -- single-process store with optimistic
//!   per-key versioning.

use async_trait::async_trait;
use tether_core::types::{SessionId, SessionKey};

use crate::models::session::{NewSession, ObsoleteReason, SessionConfig, UserSession};

pub mod memory;
pub mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

/// PostgreSQL `serialization_failure`.
pub const PG_SERIALIZATION_FAILURE: &str = "40001";
/// PostgreSQL `deadlock_detected`.
pub const PG_DEADLOCK_DETECTED: &str = "40P01";
/// PostgreSQL `unique_violation`.
pub const PG_UNIQUE_VIOLATION: &str = "23505";
/// Partial unique index enforcing one active session per (user, tenant).
pub const ACTIVE_SESSION_INDEX: &str = "uq_user_sessions_active";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A concurrent transaction wrote the same key; the caller may retry.
    #[error("Write conflict ({code})")]
    Conflict { code: String },

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Session store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    /// Classify engine errors: serialization failures, deadlocks and
    /// violations of the active-session index are write conflicts.
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            let is_conflict = match code.as_str() {
                PG_SERIALIZATION_FAILURE | PG_DEADLOCK_DETECTED => true,
                PG_UNIQUE_VIOLATION => db_err.constraint() == Some(ACTIVE_SESSION_INDEX),
                _ => false,
            };
            if is_conflict {
                return StoreError::Conflict { code };
            }
        }
        StoreError::Database(err)
    }
}

/// Durable session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a transaction for the invalidate-then-insert unit.
    async fn begin(&self) -> Result<Box<dyn SessionTx>, StoreError>;

    /// The single non-obsolete session of a (tenant, user), if any.
    async fn find_active(&self, key: SessionKey) -> Result<Option<UserSession>, StoreError>;

    async fn find_by_session_id(
        &self,
        session_id: SessionId,
    ) -> Result<Option<UserSession>, StoreError>;

    /// Every session of a (tenant, user), obsolete ones included, newest first.
    async fn list_for_key(&self, key: SessionKey) -> Result<Vec<UserSession>, StoreError>;

    /// Mark one session obsolete. Returns `true` if it was still active.
    async fn mark_obsolete(
        &self,
        session_id: SessionId,
        reason: ObsoleteReason,
    ) -> Result<bool, StoreError>;

    /// Mark every active session of a (tenant, user) obsolete.
    async fn revoke_all(&self, key: SessionKey, reason: ObsoleteReason)
        -> Result<u64, StoreError>;

    /// Replace the config of an active session in place. Returns `false` if
    /// the session is no longer active.
    async fn update_config(
        &self,
        session_id: SessionId,
        config: &SessionConfig,
    ) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// One open session-store transaction.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait SessionTx: Send {
    /// Read the active session of a key as seen by this transaction.
    async fn active_session(&mut self, key: SessionKey)
        -> Result<Option<UserSession>, StoreError>;

    /// Mark every active session of a key obsolete.
    async fn invalidate_all(
        &mut self,
        key: SessionKey,
        reason: ObsoleteReason,
    ) -> Result<u64, StoreError>;

    async fn insert(&mut self, session: &NewSession) -> Result<UserSession, StoreError>;

    async fn update_config(
        &mut self,
        session_id: SessionId,
        config: &SessionConfig,
    ) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
