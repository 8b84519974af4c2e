//! Per-request session check.
//!
//! Admission order: revocation registry, then token signature/expiry, then
//! the session store. The store check is what makes a superseded session's
//! token fail even when no termination broadcast ever reached its client.

use std::sync::Arc;

use serde::Serialize;
use tether_core::error::AuthFailure;
use tether_core::types::{DbId, SessionId, SessionKey, Timestamp};
use tether_db::store::SessionStore;

use crate::auth::jwt::{validate_token, Claims, JwtConfig, TokenKind};
use crate::auth::revocation::RevocationRegistry;
use crate::error::{AppError, AppResult};

/// Identity of an admitted request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user_id: DbId,
    pub tenant_id: DbId,
    pub session_id: SessionId,
    pub device_session_id: String,
    pub role: String,
    /// The raw bearer token, kept so logout can revoke it.
    #[serde(skip)]
    pub token: String,
    pub expires_at: Timestamp,
}

impl AuthSession {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.tenant_id, self.user_id)
    }

    fn from_claims(claims: Claims, token: &str) -> Self {
        let expires_at = claims.expires_at();
        Self {
            user_id: claims.sub,
            tenant_id: claims.tid,
            session_id: claims.sid,
            device_session_id: claims.dsid,
            role: claims.role,
            token: token.to_string(),
            expires_at,
        }
    }
}

#[derive(Clone)]
pub struct RequestGate {
    jwt: JwtConfig,
    sessions: Arc<dyn SessionStore>,
    revocations: Arc<RevocationRegistry>,
}

impl RequestGate {
    pub fn new(
        jwt: JwtConfig,
        sessions: Arc<dyn SessionStore>,
        revocations: Arc<RevocationRegistry>,
    ) -> Self {
        Self {
            jwt,
            sessions,
            revocations,
        }
    }

    /// Admit or reject a bearer access token.
    pub async fn admit(&self, token: &str) -> AppResult<AuthSession> {
        if self.revocations.is_revoked(token).await {
            return Err(AppError::auth(AuthFailure::TokenRevoked));
        }

        let claims =
            validate_token(token, TokenKind::Access, &self.jwt).map_err(AppError::auth)?;

        let active = self.sessions.find_active(claims.key()).await?;
        let current = active
            .as_ref()
            .is_some_and(|session| session.session_id == claims.sid);
        if !current {
            self.revocations.revoke(token, claims.expires_at()).await;
            tracing::info!(
                user_id = claims.sub,
                tenant_id = claims.tid,
                session_id = %claims.sid,
                "Rejected token of inactive session",
            );
            return Err(AppError::auth(AuthFailure::NoActiveSession));
        }

        Ok(AuthSession::from_claims(claims, token))
    }
}
