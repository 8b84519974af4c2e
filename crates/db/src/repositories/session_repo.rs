//! Repository for the `user_sessions` table.
//!
//! Every method accepts any PostgreSQL executor so the same statements run
//! on the pool or inside a login transaction (`&mut *tx`).

use sqlx::types::Json;
use sqlx::PgExecutor;
use tether_core::types::{SessionId, SessionKey};

use crate::models::session::{NewSession, ObsoleteReason, SessionConfig, UserSession};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, session_id, user_id, tenant_id, config, is_obsolete, \
                        obsoleted_reason, created_at, updated_at";

/// Provides the session statements used by the PostgreSQL session store.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new active session, returning the created row.
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        input: &NewSession,
    ) -> Result<UserSession, sqlx::Error> {
        let query = format!(
            "INSERT INTO user_sessions (session_id, user_id, tenant_id, config)
             VALUES ($1, $2, $3, $4)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, UserSession>(&query)
            .bind(input.session_id)
            .bind(input.user_id)
            .bind(input.tenant_id)
            .bind(Json(&input.config))
            .fetch_one(executor)
            .await
    }

    /// Find the active session for a (tenant, user).
    pub async fn find_active<'e, E: PgExecutor<'e>>(
        executor: E,
        key: SessionKey,
    ) -> Result<Option<UserSession>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_sessions
             WHERE user_id = $1 AND tenant_id = $2 AND is_obsolete = false"
        );
        sqlx::query_as::<_, UserSession>(&query)
            .bind(key.user_id)
            .bind(key.tenant_id)
            .fetch_optional(executor)
            .await
    }

    /// Take the transaction-scoped advisory lock for a (tenant, user).
    ///
    /// Held until the surrounding transaction ends. Statements issued after
    /// it is granted see every login that committed while this one waited.
    pub async fn lock_key<'e, E: PgExecutor<'e>>(
        executor: E,
        key: SessionKey,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "SELECT pg_advisory_xact_lock(
                 hashtextextended('user_sessions:' || $1::text || ':' || $2::text, 0))",
        )
        .bind(key.tenant_id)
        .bind(key.user_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Like [`find_active`](Self::find_active) but row-locks the result until
    /// the surrounding transaction ends.
    pub async fn find_active_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        key: SessionKey,
    ) -> Result<Option<UserSession>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_sessions
             WHERE user_id = $1 AND tenant_id = $2 AND is_obsolete = false
             FOR UPDATE"
        );
        sqlx::query_as::<_, UserSession>(&query)
            .bind(key.user_id)
            .bind(key.tenant_id)
            .fetch_optional(executor)
            .await
    }

    /// Find a session (active or not) by its public id.
    pub async fn find_by_session_id<'e, E: PgExecutor<'e>>(
        executor: E,
        session_id: SessionId,
    ) -> Result<Option<UserSession>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM user_sessions WHERE session_id = $1");
        sqlx::query_as::<_, UserSession>(&query)
            .bind(session_id)
            .fetch_optional(executor)
            .await
    }

    /// All sessions of a (tenant, user), newest first.
    pub async fn list_for_key<'e, E: PgExecutor<'e>>(
        executor: E,
        key: SessionKey,
    ) -> Result<Vec<UserSession>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM user_sessions
             WHERE user_id = $1 AND tenant_id = $2
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, UserSession>(&query)
            .bind(key.user_id)
            .bind(key.tenant_id)
            .fetch_all(executor)
            .await
    }

    /// Mark every active session of a (tenant, user) obsolete.
    /// Returns the count of rows changed.
    pub async fn invalidate_all<'e, E: PgExecutor<'e>>(
        executor: E,
        key: SessionKey,
        reason: ObsoleteReason,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_obsolete = true, obsoleted_reason = $3
             WHERE user_id = $1 AND tenant_id = $2 AND is_obsolete = false",
        )
        .bind(key.user_id)
        .bind(key.tenant_id)
        .bind(reason.as_str())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Mark one session obsolete. Returns `true` if it was still active.
    pub async fn mark_obsolete<'e, E: PgExecutor<'e>>(
        executor: E,
        session_id: SessionId,
        reason: ObsoleteReason,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET is_obsolete = true, obsoleted_reason = $2
             WHERE session_id = $1 AND is_obsolete = false",
        )
        .bind(session_id)
        .bind(reason.as_str())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the config blob of an active session in place.
    /// Returns `false` if the session is gone or obsolete.
    pub async fn update_config<'e, E: PgExecutor<'e>>(
        executor: E,
        session_id: SessionId,
        config: &SessionConfig,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_sessions SET config = $2
             WHERE session_id = $1 AND is_obsolete = false",
        )
        .bind(session_id)
        .bind(Json(config))
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
