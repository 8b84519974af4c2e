//! In-process [`SessionStore`] with optimistic conflict detection.
//!
//! Every (tenant, user) key carries a version number. A transaction records
//! the version of each key the first time it touches it and buffers its
//! writes; commit fails with [`StoreError::Conflict`] if any recorded
//! version moved in the meantime. Writes are applied under one lock, so a
//! committed state never holds two active sessions for a key.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use tether_core::types::{DbId, SessionId, SessionKey};
use tokio::sync::Mutex;

use super::{SessionStore, SessionTx, StoreError};
use crate::models::session::{NewSession, ObsoleteReason, SessionConfig, UserSession};

/// Conflict code reported when a key's version moved under a transaction.
pub const VERSION_CONFLICT: &str = "version_mismatch";

#[derive(Default)]
struct MemoryState {
    rows: Vec<UserSession>,
    versions: HashMap<SessionKey, u64>,
    next_id: DbId,
}

impl MemoryState {
    fn version(&self, key: SessionKey) -> u64 {
        self.versions.get(&key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: SessionKey) {
        *self.versions.entry(key).or_insert(0) += 1;
    }

    fn active(&self, key: SessionKey) -> Option<&UserSession> {
        self.rows.iter().find(|r| r.key() == key && !r.is_obsolete)
    }

    fn invalidate(&mut self, key: SessionKey, reason: ObsoleteReason) -> u64 {
        let now = Utc::now();
        let mut count = 0;
        for row in self
            .rows
            .iter_mut()
            .filter(|r| r.key() == key && !r.is_obsolete)
        {
            row.is_obsolete = true;
            row.obsoleted_reason = Some(reason.as_str().to_string());
            row.updated_at = now;
            count += 1;
        }
        count
    }

    fn set_config(&mut self, session_id: SessionId, config: &SessionConfig) -> bool {
        match self
            .rows
            .iter_mut()
            .find(|r| r.session_id == session_id && !r.is_obsolete)
        {
            Some(row) => {
                row.config = Json(config.clone());
                row.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    fn allocate_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

/// Session store kept in process memory.
///
/// Suitable for single-process deployments and tests; state is lost on
/// restart.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn begin(&self) -> Result<Box<dyn SessionTx>, StoreError> {
        Ok(Box::new(MemorySessionTx {
            state: Arc::clone(&self.state),
            observed: HashMap::new(),
            staged: Vec::new(),
        }))
    }

    async fn find_active(&self, key: SessionKey) -> Result<Option<UserSession>, StoreError> {
        Ok(self.state.lock().await.active(key).cloned())
    }

    async fn find_by_session_id(
        &self,
        session_id: SessionId,
    ) -> Result<Option<UserSession>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .find(|r| r.session_id == session_id)
            .cloned())
    }

    async fn list_for_key(&self, key: SessionKey) -> Result<Vec<UserSession>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<UserSession> =
            state.rows.iter().filter(|r| r.key() == key).cloned().collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }

    async fn mark_obsolete(
        &self,
        session_id: SessionId,
        reason: ObsoleteReason,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let key = match state
            .rows
            .iter()
            .find(|r| r.session_id == session_id && !r.is_obsolete)
        {
            Some(row) => row.key(),
            None => return Ok(false),
        };
        state.invalidate(key, reason);
        state.bump(key);
        Ok(true)
    }

    async fn revoke_all(
        &self,
        key: SessionKey,
        reason: ObsoleteReason,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let count = state.invalidate(key, reason);
        if count > 0 {
            state.bump(key);
        }
        Ok(count)
    }

    async fn update_config(
        &self,
        session_id: SessionId,
        config: &SessionConfig,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let key = state
            .rows
            .iter()
            .find(|r| r.session_id == session_id && !r.is_obsolete)
            .map(UserSession::key);
        match key {
            Some(key) => {
                state.set_config(session_id, config);
                state.bump(key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

enum StagedWrite {
    Invalidate(SessionKey, ObsoleteReason),
    Insert(UserSession),
    UpdateConfig(SessionKey, SessionId, SessionConfig),
}

struct MemorySessionTx {
    state: Arc<Mutex<MemoryState>>,
    observed: HashMap<SessionKey, u64>,
    staged: Vec<StagedWrite>,
}

impl MemorySessionTx {
    fn observe(&mut self, state: &MemoryState, key: SessionKey) {
        self.observed
            .entry(key)
            .or_insert_with(|| state.version(key));
    }

    /// Committed active row for `key` with this transaction's writes applied.
    fn view_active(&self, state: &MemoryState, key: SessionKey) -> Option<UserSession> {
        let mut current = state.active(key).cloned();
        for write in &self.staged {
            match write {
                StagedWrite::Invalidate(k, _) if *k == key => current = None,
                StagedWrite::Insert(row) if row.key() == key => current = Some(row.clone()),
                StagedWrite::UpdateConfig(k, session_id, config) if *k == key => {
                    if let Some(row) = current.as_mut() {
                        if row.session_id == *session_id {
                            row.config = Json(config.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        current
    }
}

#[async_trait]
impl SessionTx for MemorySessionTx {
    async fn active_session(
        &mut self,
        key: SessionKey,
    ) -> Result<Option<UserSession>, StoreError> {
        let state = Arc::clone(&self.state);
        let state = state.lock().await;
        self.observe(&state, key);
        Ok(self.view_active(&state, key))
    }

    async fn invalidate_all(
        &mut self,
        key: SessionKey,
        reason: ObsoleteReason,
    ) -> Result<u64, StoreError> {
        let state = Arc::clone(&self.state);
        let state = state.lock().await;
        self.observe(&state, key);
        let affected = u64::from(self.view_active(&state, key).is_some());
        self.staged.push(StagedWrite::Invalidate(key, reason));
        Ok(affected)
    }

    async fn insert(&mut self, session: &NewSession) -> Result<UserSession, StoreError> {
        let state = Arc::clone(&self.state);
        let mut state = state.lock().await;
        let key = session.key();
        self.observe(&state, key);
        if self.view_active(&state, key).is_some() {
            return Err(StoreError::Backend(format!(
                "active session already exists for {key}"
            )));
        }
        let now = Utc::now();
        let row = UserSession {
            id: state.allocate_id(),
            session_id: session.session_id,
            user_id: session.user_id,
            tenant_id: session.tenant_id,
            config: Json(session.config.clone()),
            is_obsolete: false,
            obsoleted_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.staged.push(StagedWrite::Insert(row.clone()));
        Ok(row)
    }

    async fn update_config(
        &mut self,
        session_id: SessionId,
        config: &SessionConfig,
    ) -> Result<bool, StoreError> {
        let state = Arc::clone(&self.state);
        let state = state.lock().await;
        let key = state
            .rows
            .iter()
            .map(UserSession::key)
            .chain(self.staged.iter().filter_map(|w| match w {
                StagedWrite::Insert(row) => Some(row.key()),
                _ => None,
            }))
            .find(|key| {
                self.view_active(&state, *key)
                    .is_some_and(|row| row.session_id == session_id)
            });
        let Some(key) = key else {
            return Ok(false);
        };
        self.observe(&state, key);
        self.staged
            .push(StagedWrite::UpdateConfig(key, session_id, config.clone()));
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemorySessionTx {
            state,
            observed,
            staged,
        } = *self;
        let mut state = state.lock().await;
        for (key, seen) in &observed {
            if state.version(*key) != *seen {
                return Err(StoreError::Conflict {
                    code: VERSION_CONFLICT.to_string(),
                });
            }
        }

        let mut written = Vec::new();
        for write in staged {
            match write {
                StagedWrite::Invalidate(key, reason) => {
                    state.invalidate(key, reason);
                    written.push(key);
                }
                StagedWrite::Insert(row) => {
                    let key = row.key();
                    state.invalidate(key, ObsoleteReason::Superseded);
                    state.rows.push(row);
                    written.push(key);
                }
                StagedWrite::UpdateConfig(key, session_id, config) => {
                    state.set_config(session_id, &config);
                    written.push(key);
                }
            }
        }
        for key in written {
            state.bump(key);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use uuid::Uuid;

    use super::*;

    fn new_session(key: SessionKey, device: &str) -> NewSession {
        NewSession {
            session_id: Uuid::new_v4(),
            user_id: key.user_id,
            tenant_id: key.tenant_id,
            config: SessionConfig {
                device_session_id: device.to_string(),
                access_fingerprint: "fp".into(),
                refresh_fingerprints: vec!["rfp".into()],
                client_ip: None,
                user_agent: None,
                issued_at: Utc::now(),
                refreshed_at: None,
            },
        }
    }

    #[tokio::test]
    async fn invalidate_then_insert_leaves_one_active() {
        let store = MemorySessionStore::new();
        let key = SessionKey::new(1, 10);

        for device in ["a", "b", "c"] {
            let mut tx = store.begin().await.unwrap();
            tx.invalidate_all(key, ObsoleteReason::Superseded)
                .await
                .unwrap();
            tx.insert(&new_session(key, device)).await.unwrap();
            tx.commit().await.unwrap();
        }

        let rows = store.list_for_key(key).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| !r.is_obsolete).count(), 1);
        let active = store.find_active(key).await.unwrap().unwrap();
        assert_eq!(active.device_session_id(), "c");
        assert_eq!(rows[1].obsoleted_reason.as_deref(), Some("superseded"));
    }

    #[tokio::test]
    async fn interleaved_transactions_conflict_for_the_later_committer() {
        let store = MemorySessionStore::new();
        let key = SessionKey::new(1, 10);

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first
            .invalidate_all(key, ObsoleteReason::Superseded)
            .await
            .unwrap();
        second
            .invalidate_all(key, ObsoleteReason::Superseded)
            .await
            .unwrap();
        first.insert(&new_session(key, "a")).await.unwrap();
        second.insert(&new_session(key, "b")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert_matches!(err, StoreError::Conflict { ref code } if code == VERSION_CONFLICT);

        let active = store.find_active(key).await.unwrap().unwrap();
        assert_eq!(active.device_session_id(), "a");
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_and_discarded() {
        let store = MemorySessionStore::new();
        let key = SessionKey::new(1, 10);

        let mut tx = store.begin().await.unwrap();
        tx.insert(&new_session(key, "a")).await.unwrap();
        assert!(tx.active_session(key).await.unwrap().is_some());
        assert!(store.find_active(key).await.unwrap().is_none());

        tx.rollback().await.unwrap();
        assert!(store.list_for_key(key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn config_update_inside_transaction_applies_on_commit() {
        let store = MemorySessionStore::new();
        let key = SessionKey::new(1, 10);
        let session = new_session(key, "a");

        let mut tx = store.begin().await.unwrap();
        tx.insert(&session).await.unwrap();
        tx.commit().await.unwrap();

        let mut config = session.config.clone();
        config.push_refresh_fingerprint("second-tab".into());
        let mut tx = store.begin().await.unwrap();
        assert!(tx.update_config(session.session_id, &config).await.unwrap());
        tx.commit().await.unwrap();

        let active = store.find_active(key).await.unwrap().unwrap();
        assert!(active.config.accepts_refresh("second-tab"));
    }

    #[tokio::test]
    async fn mark_obsolete_is_terminal() {
        let store = MemorySessionStore::new();
        let key = SessionKey::new(1, 10);
        let session = new_session(key, "a");

        let mut tx = store.begin().await.unwrap();
        tx.insert(&session).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store
            .mark_obsolete(session.session_id, ObsoleteReason::Logout)
            .await
            .unwrap());
        assert!(!store
            .mark_obsolete(session.session_id, ObsoleteReason::Logout)
            .await
            .unwrap());
        assert!(!store
            .update_config(session.session_id, &session.config)
            .await
            .unwrap());

        let row = store
            .find_by_session_id(session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_obsolete);
        assert_eq!(row.obsoleted_reason.as_deref(), Some("logout"));
    }

    #[tokio::test]
    async fn config_refresh_conflicts_with_open_login() {
        let store = MemorySessionStore::new();
        let key = SessionKey::new(1, 10);
        let session = new_session(key, "a");

        let mut tx = store.begin().await.unwrap();
        tx.insert(&session).await.unwrap();
        tx.commit().await.unwrap();

        let mut login = store.begin().await.unwrap();
        login.active_session(key).await.unwrap();
        store
            .update_config(session.session_id, &session.config)
            .await
            .unwrap();
        login
            .invalidate_all(key, ObsoleteReason::Superseded)
            .await
            .unwrap();
        assert!(login.commit().await.unwrap_err().is_conflict());
    }
}
