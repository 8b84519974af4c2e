//! PostgreSQL-backed [`SessionStore`].

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tether_core::types::{SessionId, SessionKey};

use super::{SessionStore, SessionTx, StoreError};
use crate::models::session::{NewSession, ObsoleteReason, SessionConfig, UserSession};
use crate::repositories::SessionRepo;

/// Session store on the `user_sessions` table.
///
/// Login transactions run at READ COMMITTED. Reading the active session
/// first takes a per-(tenant, user) advisory lock, so a competing login
/// waits until the first commits and then reads the session it left
/// behind. The active row is also locked `FOR UPDATE`, and any insert that
/// still slips past collides on `uq_user_sessions_active`, reported as
/// [`StoreError::Conflict`].
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn begin(&self) -> Result<Box<dyn SessionTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgSessionTx { tx }))
    }

    async fn find_active(&self, key: SessionKey) -> Result<Option<UserSession>, StoreError> {
        Ok(SessionRepo::find_active(&self.pool, key).await?)
    }

    async fn find_by_session_id(
        &self,
        session_id: SessionId,
    ) -> Result<Option<UserSession>, StoreError> {
        Ok(SessionRepo::find_by_session_id(&self.pool, session_id).await?)
    }

    async fn list_for_key(&self, key: SessionKey) -> Result<Vec<UserSession>, StoreError> {
        Ok(SessionRepo::list_for_key(&self.pool, key).await?)
    }

    async fn mark_obsolete(
        &self,
        session_id: SessionId,
        reason: ObsoleteReason,
    ) -> Result<bool, StoreError> {
        Ok(SessionRepo::mark_obsolete(&self.pool, session_id, reason).await?)
    }

    async fn revoke_all(
        &self,
        key: SessionKey,
        reason: ObsoleteReason,
    ) -> Result<u64, StoreError> {
        Ok(SessionRepo::invalidate_all(&self.pool, key, reason).await?)
    }

    async fn update_config(
        &self,
        session_id: SessionId,
        config: &SessionConfig,
    ) -> Result<bool, StoreError> {
        Ok(SessionRepo::update_config(&self.pool, session_id, config).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}

struct PgSessionTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SessionTx for PgSessionTx {
    async fn active_session(
        &mut self,
        key: SessionKey,
    ) -> Result<Option<UserSession>, StoreError> {
        SessionRepo::lock_key(&mut *self.tx, key).await?;
        Ok(SessionRepo::find_active_for_update(&mut *self.tx, key).await?)
    }

    async fn invalidate_all(
        &mut self,
        key: SessionKey,
        reason: ObsoleteReason,
    ) -> Result<u64, StoreError> {
        Ok(SessionRepo::invalidate_all(&mut *self.tx, key, reason).await?)
    }

    async fn insert(&mut self, session: &NewSession) -> Result<UserSession, StoreError> {
        Ok(SessionRepo::create(&mut *self.tx, session).await?)
    }

    async fn update_config(
        &mut self,
        session_id: SessionId,
        config: &SessionConfig,
    ) -> Result<bool, StoreError> {
        Ok(SessionRepo::update_config(&mut *self.tx, session_id, config).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.tx.commit().await?)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.tx.rollback().await?)
    }
}
