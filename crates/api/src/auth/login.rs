//! Session lifecycle: login, refresh, logout and administrative revocation.
//!
//! A login marks every prior session of the (tenant, user) obsolete and
//! inserts the new one in a single store transaction. Concurrent logins for
//! the same account surface as [`StoreError::Conflict`]; the transaction is
//! retried with jittered exponential backoff and the last commit wins. After
//! a commit the coordinator enqueues a termination command for the realtime
//! channels of every other device session, without waiting on it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tether_core::error::{AuthFailure, CoreError};
use tether_core::retry::RetryPolicy;
use tether_core::types::{DbId, SessionId, SessionKey};
use tether_db::models::session::{NewSession, ObsoleteReason, SessionConfig};
use tether_db::store::{SessionStore, SessionTx, StoreError};
use uuid::Uuid;

use crate::auth::credentials::{Account, CredentialRequest, CredentialVerifier};
use crate::auth::gate::AuthSession;
use crate::auth::jwt::{
    decode_ignoring_expiry, fingerprint, generate_access_token, generate_refresh_token,
    validate_token, IssuedToken, JwtConfig, TokenKind, TokenSubject,
};
use crate::auth::password::validate_new_password;
use crate::auth::revocation::RevocationRegistry;
use crate::error::{AppError, AppResult};
use crate::middleware::client::ClientMeta;
use crate::ws::notifier::{TerminationCommand, TerminationNotifier};
use crate::ws::protocol::reasons;

/// Longest accepted client-supplied device session id.
pub const MAX_DEVICE_SESSION_ID_LEN: usize = 128;

/// Default pause between invalidating old sessions and inserting the new one.
pub const DEFAULT_WIDEN_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub retry: RetryPolicy,
    /// Sleep inside the login transaction after the invalidate step.
    ///
    /// Widens the window in which a racing login observes this one, so the
    /// conflict is detected at commit instead of slipping past. A heuristic
    /// only; the conflict check itself is what keeps one session active.
    pub widen_delay: Duration,
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            widen_delay: DEFAULT_WIDEN_DELAY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginCommand {
    pub username: String,
    pub password: String,
    /// Replacement password for accounts that must change theirs.
    pub new_password: Option<String>,
    /// Public tenant key; `None` selects the default tenant.
    pub tenant: Option<String>,
    /// Device session the client already belongs to, if any.
    pub device_session_id: Option<String>,
    pub client: ClientMeta,
}

/// Tokens and identity of an established session.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: SessionId,
    pub device_session_id: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: i64,
    pub account: Account,
    /// The login joined the already-active session of its device instead of
    /// replacing it.
    pub adopted: bool,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Password change required; no session was created.
    FirstLogin { user_id: DbId, username: String },
    Established(IssuedSession),
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshedSession {
    pub access_token: String,
    pub session_id: SessionId,
    pub expires_in: i64,
}

struct TokenPair {
    access: IssuedToken,
    refresh: IssuedToken,
}

/// Why one login attempt failed.
enum AttemptError {
    Conflict(String),
    Fatal(AppError),
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { code } => AttemptError::Conflict(code),
            other => AttemptError::Fatal(AppError::Store(other)),
        }
    }
}

pub struct LoginCoordinator {
    sessions: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialVerifier>,
    revocations: Arc<RevocationRegistry>,
    notifier: TerminationNotifier,
    jwt: JwtConfig,
    settings: LoginSettings,
}

impl LoginCoordinator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialVerifier>,
        revocations: Arc<RevocationRegistry>,
        notifier: TerminationNotifier,
        jwt: JwtConfig,
        settings: LoginSettings,
    ) -> Self {
        Self {
            sessions,
            credentials,
            revocations,
            notifier,
            jwt,
            settings,
        }
    }

    /// Authenticate and establish the single active session of the account.
    pub async fn login(&self, command: LoginCommand) -> AppResult<LoginOutcome> {
        if command.username.trim().is_empty() || command.password.is_empty() {
            return Err(CoreError::Validation("Username and password are required".into()).into());
        }
        let device_session_id = command
            .device_session_id
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        if device_session_id.is_some_and(|d| d.len() > MAX_DEVICE_SESSION_ID_LEN) {
            return Err(CoreError::Validation(format!(
                "device_session_id must be at most {MAX_DEVICE_SESSION_ID_LEN} characters"
            ))
            .into());
        }

        let account = self
            .credentials
            .verify(CredentialRequest {
                username: command.username.trim(),
                password: &command.password,
                tenant: command.tenant.as_deref(),
            })
            .await
            .map_err(|err| {
                tracing::info!(username = %command.username, error = %err, "Login rejected");
                CoreError::from(err)
            })?;

        if account.must_change_password {
            let Some(new_password) = command.new_password.as_deref() else {
                tracing::info!(user_id = account.user_id, "Password change required before login");
                return Ok(LoginOutcome::FirstLogin {
                    user_id: account.user_id,
                    username: account.username,
                });
            };
            validate_new_password(new_password, &command.password)?;
            self.credentials
                .set_password(&account, new_password)
                .await
                .map_err(CoreError::from)?;
        }

        let issued = self
            .establish(&account, device_session_id, &command.client)
            .await?;

        self.notifier.notify(TerminationCommand::SupersedeOtherDevices {
            key: account.key(),
            keep_device: issued.device_session_id.clone(),
            reason: reasons::SIGNED_IN_ELSEWHERE,
        });

        tracing::info!(
            user_id = account.user_id,
            tenant_id = account.tenant_id,
            session_id = %issued.session_id,
            device_session_id = %issued.device_session_id,
            adopted = issued.adopted,
            "Login established",
        );
        Ok(LoginOutcome::Established(issued))
    }

    /// Run the session transaction, retrying on write conflicts.
    ///
    /// Credentials are not re-checked between attempts. Once the retry
    /// budget is spent the caller gets [`CoreError::TransientBusy`].
    pub async fn establish(
        &self,
        account: &Account,
        device_session_id: Option<&str>,
        client: &ClientMeta,
    ) -> AppResult<IssuedSession> {
        let policy = &self.settings.retry;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.attempt(account, device_session_id, client).await {
                Ok(issued) => {
                    if attempt > 1 {
                        tracing::debug!(user_id = account.user_id, attempt, "Login committed after retry");
                    }
                    return Ok(issued);
                }
                Err(AttemptError::Conflict(code)) => {
                    if !policy.should_retry(attempt) {
                        tracing::warn!(
                            user_id = account.user_id,
                            tenant_id = account.tenant_id,
                            attempts = attempt,
                            code = %code,
                            "Login retry budget exhausted",
                        );
                        return Err(CoreError::TransientBusy(
                            "Too many concurrent logins for this account; retry shortly".into(),
                        )
                        .into());
                    }
                    let delay = policy.delay_for(attempt);
                    tracing::debug!(
                        user_id = account.user_id,
                        attempt,
                        code = %code,
                        delay_ms = delay.as_millis() as u64,
                        "Login write conflict; retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        account: &Account,
        device_session_id: Option<&str>,
        client: &ClientMeta,
    ) -> Result<IssuedSession, AttemptError> {
        let mut tx = self.sessions.begin().await?;
        match self
            .write_session(tx.as_mut(), account, device_session_id, client)
            .await
        {
            Ok(issued) => {
                tx.commit().await?;
                Ok(issued)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Session transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn write_session(
        &self,
        tx: &mut dyn SessionTx,
        account: &Account,
        device_session_id: Option<&str>,
        client: &ClientMeta,
    ) -> Result<IssuedSession, AttemptError> {
        let key = account.key();
        let active = tx.active_session(key).await?;

        // A second tab of the same login instance joins the active session.
        if let (Some(requested), Some(active)) = (device_session_id, active.as_ref()) {
            if active.device_session_id() == requested {
                let tokens = self.mint(account, active.session_id, requested)?;
                let mut config = active.config.0.clone();
                config.access_fingerprint = fingerprint(&tokens.access.token);
                config.push_refresh_fingerprint(fingerprint(&tokens.refresh.token));
                if !tx.update_config(active.session_id, &config).await? {
                    return Err(AttemptError::Conflict("session_vanished".into()));
                }
                return Ok(self.issued(account, tokens, active.session_id, requested, true));
            }
        }

        tx.invalidate_all(key, ObsoleteReason::Superseded).await?;
        if !self.settings.widen_delay.is_zero() {
            tokio::time::sleep(self.settings.widen_delay).await;
        }

        let session_id = Uuid::new_v4();
        let device_session_id = device_session_id
            .map(str::to_string)
            .unwrap_or_else(|| session_id.to_string());
        let tokens = self.mint(account, session_id, &device_session_id)?;

        tx.insert(&NewSession {
            session_id,
            user_id: account.user_id,
            tenant_id: account.tenant_id,
            config: SessionConfig {
                device_session_id: device_session_id.clone(),
                access_fingerprint: fingerprint(&tokens.access.token),
                refresh_fingerprints: vec![fingerprint(&tokens.refresh.token)],
                client_ip: client.ip.clone(),
                user_agent: client.user_agent.clone(),
                issued_at: Utc::now(),
                refreshed_at: None,
            },
        })
        .await?;

        Ok(self.issued(account, tokens, session_id, &device_session_id, false))
    }

    fn mint(
        &self,
        account: &Account,
        session_id: SessionId,
        device_session_id: &str,
    ) -> Result<TokenPair, AttemptError> {
        let subject = TokenSubject {
            user_id: account.user_id,
            tenant_id: account.tenant_id,
            session_id,
            device_session_id,
            role: &account.role,
        };
        let token_error = |e: jsonwebtoken::errors::Error| {
            AttemptError::Fatal(AppError::InternalError(format!(
                "Token generation error: {e}"
            )))
        };
        Ok(TokenPair {
            access: generate_access_token(subject, &self.jwt).map_err(token_error)?,
            refresh: generate_refresh_token(subject, &self.jwt).map_err(token_error)?,
        })
    }

    fn issued(
        &self,
        account: &Account,
        tokens: TokenPair,
        session_id: SessionId,
        device_session_id: &str,
        adopted: bool,
    ) -> IssuedSession {
        IssuedSession {
            access_token: tokens.access.token,
            refresh_token: tokens.refresh.token,
            session_id,
            device_session_id: device_session_id.to_string(),
            expires_in: self.jwt.access_ttl_secs(),
            refresh_expires_in: self.jwt.refresh_ttl_secs(),
            account: account.clone(),
            adopted,
        }
    }

    /// Issue a new access token for the same session.
    ///
    /// `access_token` may have expired; it must still carry a valid signature
    /// and name the same session as `refresh_token`. The session id does not
    /// change and the session config is updated in place.
    pub async fn refresh(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> AppResult<RefreshedSession> {
        let refresh_claims = validate_token(refresh_token, TokenKind::Refresh, &self.jwt)
            .map_err(|_| AppError::auth(AuthFailure::RefreshRejected))?;
        if self.revocations.is_revoked(refresh_token).await {
            return Err(AppError::auth(AuthFailure::RefreshRejected));
        }
        if self.revocations.is_revoked(access_token).await {
            return Err(AppError::auth(AuthFailure::TokenRevoked));
        }
        let access_claims =
            decode_ignoring_expiry(access_token, TokenKind::Access, &self.jwt).map_err(AppError::auth)?;
        if access_claims.sid != refresh_claims.sid || access_claims.key() != refresh_claims.key() {
            return Err(AppError::auth(AuthFailure::RefreshRejected));
        }

        let key = refresh_claims.key();
        let active = self
            .sessions
            .find_active(key)
            .await?
            .filter(|s| s.session_id == refresh_claims.sid);
        let Some(active) = active else {
            self.revocations
                .revoke(refresh_token, refresh_claims.expires_at())
                .await;
            return Err(AppError::auth(AuthFailure::NoActiveSession));
        };
        if !active.config.accepts_refresh(&fingerprint(refresh_token)) {
            tracing::warn!(user_id = key.user_id, session_id = %active.session_id, "Unknown refresh token for active session");
            return Err(AppError::auth(AuthFailure::RefreshRejected));
        }

        let access = generate_access_token(
            TokenSubject {
                user_id: refresh_claims.sub,
                tenant_id: refresh_claims.tid,
                session_id: refresh_claims.sid,
                device_session_id: &refresh_claims.dsid,
                role: &refresh_claims.role,
            },
            &self.jwt,
        )
        .map_err(|e| AppError::InternalError(format!("Token generation error: {e}")))?;

        let mut config = active.config.0.clone();
        config.access_fingerprint = fingerprint(&access.token);
        config.refreshed_at = Some(Utc::now());
        if !self.sessions.update_config(active.session_id, &config).await? {
            return Err(AppError::auth(AuthFailure::NoActiveSession));
        }

        // The previous access token stops working as soon as its
        // replacement exists.
        self.revocations
            .revoke(access_token, access_claims.expires_at())
            .await;

        tracing::debug!(user_id = key.user_id, session_id = %active.session_id, "Access token refreshed");
        Ok(RefreshedSession {
            access_token: access.token,
            session_id: active.session_id,
            expires_in: self.jwt.access_ttl_secs(),
        })
    }

    /// End the caller's own session.
    pub async fn logout(&self, session: &AuthSession, session_id: SessionId) -> AppResult<()> {
        if session.session_id != session_id {
            return Err(CoreError::Forbidden("Session does not belong to the caller".into()).into());
        }
        self.revocations
            .revoke(&session.token, session.expires_at)
            .await;
        let ended = self
            .sessions
            .mark_obsolete(session_id, ObsoleteReason::Logout)
            .await?;

        self.notifier.notify(TerminationCommand::EndDeviceSession {
            key: session.key(),
            device_session_id: session.device_session_id.clone(),
            reason: reasons::LOGOUT,
        });
        tracing::info!(
            user_id = session.user_id,
            tenant_id = session.tenant_id,
            session_id = %session_id,
            ended,
            "Logged out",
        );
        Ok(())
    }

    /// Mark every session of a (tenant, user) obsolete and end its channels.
    pub async fn revoke_user(&self, key: SessionKey, revoked_by: DbId) -> AppResult<u64> {
        let revoked = self
            .sessions
            .revoke_all(key, ObsoleteReason::AdminRevoked)
            .await?;
        self.notifier.notify(TerminationCommand::EndAllForUser {
            key,
            reason: reasons::REVOKED_BY_ADMIN,
        });
        tracing::info!(%key, revoked, revoked_by, "Sessions revoked by administrator");
        Ok(revoked)
    }
}
