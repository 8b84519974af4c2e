//! User session model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use tether_core::types::{DbId, SessionId, SessionKey, Timestamp};

/// Refresh fingerprints kept per session; the oldest are dropped first.
pub const MAX_REFRESH_FINGERPRINTS: usize = 8;

/// A row from the `user_sessions` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserSession {
    pub id: DbId,
    pub session_id: SessionId,
    pub user_id: DbId,
    pub tenant_id: DbId,
    pub config: Json<SessionConfig>,
    pub is_obsolete: bool,
    pub obsoleted_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl UserSession {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.tenant_id, self.user_id)
    }

    pub fn device_session_id(&self) -> &str {
        &self.config.device_session_id
    }
}

/// Opaque per-session blob stored in `user_sessions.config`.
///
/// Holds token fingerprints (SHA-256 hex, never the tokens themselves) and
/// the device/network metadata captured at login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Groups the realtime channels of this login instance.
    pub device_session_id: String,
    /// Fingerprint of the most recently issued access token.
    pub access_fingerprint: String,
    /// Fingerprints of refresh tokens issued for this session (one per tab
    /// that joined it), newest last.
    #[serde(default)]
    pub refresh_fingerprints: Vec<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub issued_at: Timestamp,
    pub refreshed_at: Option<Timestamp>,
}

impl SessionConfig {
    pub fn push_refresh_fingerprint(&mut self, fingerprint: String) {
        self.refresh_fingerprints.push(fingerprint);
        let excess = self
            .refresh_fingerprints
            .len()
            .saturating_sub(MAX_REFRESH_FINGERPRINTS);
        if excess > 0 {
            self.refresh_fingerprints.drain(..excess);
        }
    }

    pub fn accepts_refresh(&self, fingerprint: &str) -> bool {
        self.refresh_fingerprints.iter().any(|f| f == fingerprint)
    }
}

/// DTO for inserting a new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: SessionId,
    pub user_id: DbId,
    pub tenant_id: DbId,
    pub config: SessionConfig,
}

impl NewSession {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.tenant_id, self.user_id)
    }
}

/// Why a session row was marked obsolete. Stored in `obsoleted_reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObsoleteReason {
    /// A later login for the same (tenant, user) replaced it.
    Superseded,
    Logout,
    AdminRevoked,
}

impl ObsoleteReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ObsoleteReason::Superseded => "superseded",
            ObsoleteReason::Logout => "logout",
            ObsoleteReason::AdminRevoked => "admin_revoked",
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            device_session_id: "dev".into(),
            access_fingerprint: "a".into(),
            refresh_fingerprints: Vec::new(),
            client_ip: None,
            user_agent: None,
            issued_at: Utc::now(),
            refreshed_at: None,
        }
    }

    #[test]
    fn refresh_fingerprints_are_capped_oldest_first() {
        let mut config = config();
        for i in 0..(MAX_REFRESH_FINGERPRINTS + 3) {
            config.push_refresh_fingerprint(format!("fp-{i}"));
        }
        assert_eq!(config.refresh_fingerprints.len(), MAX_REFRESH_FINGERPRINTS);
        assert!(!config.accepts_refresh("fp-0"));
        assert!(!config.accepts_refresh("fp-2"));
        assert!(config.accepts_refresh("fp-3"));
        assert!(config.accepts_refresh(&format!("fp-{}", MAX_REFRESH_FINGERPRINTS + 2)));
    }

    #[test]
    fn config_tolerates_missing_fingerprint_list() {
        let json = serde_json::json!({
            "device_session_id": "dev",
            "access_fingerprint": "a",
            "client_ip": null,
            "user_agent": null,
            "issued_at": "2026-01-01T00:00:00Z",
            "refreshed_at": null
        });
        let config: SessionConfig = serde_json::from_value(json).expect("valid config");
        assert!(config.refresh_fingerprints.is_empty());
    }
}
