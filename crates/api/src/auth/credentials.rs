//! Credential verification boundary.
//!
//! The login coordinator only needs "is this (username, password, tenant)
//! valid, and what state is the account in". [`PgCredentialVerifier`]
//! answers that from the `users`/`tenants` tables and applies the lockout
//! policy; tests substitute their own [`CredentialVerifier`].

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tether_core::error::{AuthFailure, CoreError};
use tether_core::types::{DbId, SessionKey};
use tether_db::models::user::User;
use tether_db::repositories::{TenantRepo, UserRepo};
use tether_db::DbPool;

use crate::auth::password::{hash_password, verify_password};

/// Maximum consecutive failed login attempts before locking the account.
pub const MAX_FAILED_ATTEMPTS: i32 = 5;

/// Duration in minutes to lock an account after exceeding failed attempts.
pub const LOCK_DURATION_MINS: i64 = 15;

/// An account whose credentials have been verified.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub user_id: DbId,
    pub tenant_id: DbId,
    pub username: String,
    pub email: String,
    pub role: String,
    pub must_change_password: bool,
}

impl Account {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.tenant_id, self.user_id)
    }
}

impl From<User> for Account {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            tenant_id: user.tenant_id,
            username: user.username,
            email: user.email,
            role: user.role,
            must_change_password: user.must_change_password,
        }
    }
}

/// A login attempt. `tenant` is the public tenant key (`unique_admin_id`);
/// `None` selects the default tenant.
#[derive(Debug, Clone, Copy)]
pub struct CredentialRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub tenant: Option<&'a str>,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("account not found")]
    NotFound,
    #[error("account is disabled")]
    Disabled,
    #[error("account is temporarily locked")]
    Locked,
    #[error("invalid username or password")]
    BadCredentials,
    #[error("credential backend error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for CredentialError {
    fn from(err: sqlx::Error) -> Self {
        CredentialError::Internal(err.to_string())
    }
}

impl From<CredentialError> for CoreError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotFound | CredentialError::Disabled => CoreError::NotFound {
                entity: "Account",
                key: "requested username".to_string(),
            },
            CredentialError::Locked => CoreError::Forbidden(
                "Account is temporarily locked. Try again later.".to_string(),
            ),
            CredentialError::BadCredentials => CoreError::auth(AuthFailure::BadCredentials),
            CredentialError::Internal(msg) => CoreError::Internal(msg),
        }
    }
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Check a username/password pair within a tenant.
    async fn verify(&self, request: CredentialRequest<'_>) -> Result<Account, CredentialError>;

    /// Replace the account's password and clear `must_change_password`.
    async fn set_password(&self, account: &Account, new_password: &str)
        -> Result<(), CredentialError>;
}

/// Verifies credentials against PostgreSQL with argon2 hashes.
#[derive(Clone)]
pub struct PgCredentialVerifier {
    pool: DbPool,
    default_tenant: String,
}

impl PgCredentialVerifier {
    pub fn new(pool: DbPool, default_tenant: impl Into<String>) -> Self {
        Self {
            pool,
            default_tenant: default_tenant.into(),
        }
    }

    async fn record_failure(&self, user: &User) -> Result<(), CredentialError> {
        let failures = UserRepo::increment_failed_login(&self.pool, user.id).await?;
        if failures >= MAX_FAILED_ATTEMPTS {
            let lock_until = Utc::now() + chrono::Duration::minutes(LOCK_DURATION_MINS);
            UserRepo::lock_account(&self.pool, user.id, lock_until).await?;
            tracing::warn!(
                user_id = user.id,
                tenant_id = user.tenant_id,
                failures,
                "Account locked after repeated failed logins",
            );
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialVerifier for PgCredentialVerifier {
    async fn verify(&self, request: CredentialRequest<'_>) -> Result<Account, CredentialError> {
        let tenant_key = request.tenant.unwrap_or(&self.default_tenant);
        let tenant = TenantRepo::find_by_unique_admin_id(&self.pool, tenant_key)
            .await?
            .filter(|t| t.is_active)
            .ok_or(CredentialError::NotFound)?;

        let user = UserRepo::find_by_username(&self.pool, tenant.id, request.username)
            .await?
            .ok_or(CredentialError::NotFound)?;

        if !user.is_active {
            return Err(CredentialError::Disabled);
        }
        if user.locked_until.is_some_and(|until| until > Utc::now()) {
            return Err(CredentialError::Locked);
        }

        let valid = verify_password(request.password, &user.password_hash)
            .map_err(|e| CredentialError::Internal(format!("Password verification error: {e}")))?;
        if !valid {
            self.record_failure(&user).await?;
            return Err(CredentialError::BadCredentials);
        }

        UserRepo::record_successful_login(&self.pool, user.id).await?;
        Ok(Account::from(user))
    }

    async fn set_password(
        &self,
        account: &Account,
        new_password: &str,
    ) -> Result<(), CredentialError> {
        let hash = hash_password(new_password)
            .map_err(|e| CredentialError::Internal(format!("Password hashing error: {e}")))?;
        let updated = UserRepo::update_password(&self.pool, account.user_id, &hash).await?;
        if !updated {
            return Err(CredentialError::NotFound);
        }
        tracing::info!(user_id = account.user_id, "Password changed on first login");
        Ok(())
    }
}
