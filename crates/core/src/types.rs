/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of one login instance (a `user_sessions` row).
pub type SessionId = uuid::Uuid;

/// The (tenant, user) pair that may hold at most one active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub tenant_id: DbId,
    pub user_id: DbId,
}

impl SessionKey {
    pub fn new(tenant_id: DbId, user_id: DbId) -> Self {
        Self { tenant_id, user_id }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tenant {} user {}", self.tenant_id, self.user_id)
    }
}
