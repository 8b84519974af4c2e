//! Stateless token issuing and verification.
//!
//! Both access and refresh tokens are HS256-signed JWTs carrying the session
//! identity ([`Claims::sid`]) and device session ([`Claims::dsid`]) they were
//! minted for. The [`Claims::kind`] claim keeps one from being replayed as the
//! other. Only SHA-256 [`fingerprint`]s of tokens are ever persisted.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tether_core::error::AuthFailure;
use tether_core::types::{DbId, SessionId, SessionKey, Timestamp};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims embedded in every token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject -- the user's internal database id.
    pub sub: DbId,
    /// Tenant the session belongs to.
    pub tid: DbId,
    /// Session the token was issued for.
    pub sid: SessionId,
    /// Device session grouping the client's realtime channels.
    pub dsid: String,
    /// The user's role name at issue time.
    pub role: String,
    pub kind: TokenKind,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier (UUID v4). Makes every minted token distinct.
    pub jti: String,
}

impl Claims {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.tid, self.sub)
    }

    pub fn expires_at(&self) -> Timestamp {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Configuration for JWT token generation and validation.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 secret used to sign and verify tokens.
    pub secret: String,
    /// Access token lifetime in minutes (default: 15).
    pub access_token_expiry_mins: i64,
    /// Refresh token lifetime in days (default: 7).
    pub refresh_token_expiry_days: i64,
}

const DEFAULT_ACCESS_EXPIRY_MINS: i64 = 15;
const DEFAULT_REFRESH_EXPIRY_DAYS: i64 = 7;

impl JwtConfig {
    /// Load JWT configuration from environment variables.
    ///
    /// | Env Var                    | Required | Default |
    /// |----------------------------|----------|---------|
    /// | `JWT_SECRET`               | **yes**  | --      |
    /// | `JWT_ACCESS_EXPIRY_MINS`   | no       | `15`    |
    /// | `JWT_REFRESH_EXPIRY_DAYS`  | no       | `7`     |
    ///
    /// # Panics
    ///
    /// Panics if `JWT_SECRET` is not set or is empty.
    pub fn from_env() -> Self {
        let secret =
            std::env::var("JWT_SECRET").expect("JWT_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "JWT_SECRET must not be empty");

        let access_token_expiry_mins: i64 = std::env::var("JWT_ACCESS_EXPIRY_MINS")
            .unwrap_or_else(|_| DEFAULT_ACCESS_EXPIRY_MINS.to_string())
            .parse()
            .expect("JWT_ACCESS_EXPIRY_MINS must be a valid i64");

        let refresh_token_expiry_days: i64 = std::env::var("JWT_REFRESH_EXPIRY_DAYS")
            .unwrap_or_else(|_| DEFAULT_REFRESH_EXPIRY_DAYS.to_string())
            .parse()
            .expect("JWT_REFRESH_EXPIRY_DAYS must be a valid i64");

        Self {
            secret,
            access_token_expiry_mins,
            refresh_token_expiry_days,
        }
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_token_expiry_mins * 60
    }

    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_token_expiry_days * 24 * 60 * 60
    }
}

/// Who a token is minted for.
#[derive(Debug, Clone, Copy)]
pub struct TokenSubject<'a> {
    pub user_id: DbId,
    pub tenant_id: DbId,
    pub session_id: SessionId,
    pub device_session_id: &'a str,
    pub role: &'a str,
}

/// An encoded token together with the claims inside it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

fn issue(
    subject: TokenSubject<'_>,
    kind: TokenKind,
    ttl_secs: i64,
    config: &JwtConfig,
) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: subject.user_id,
        tid: subject.tenant_id,
        sid: subject.session_id,
        dsid: subject.device_session_id.to_string(),
        role: subject.role.to_string(),
        kind,
        exp: now + ttl_secs,
        iat: now,
        jti: Uuid::new_v4().to_string(),
    };

    let token = encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;
    Ok(IssuedToken { token, claims })
}

/// Generate a short-lived HS256 access token.
pub fn generate_access_token(
    subject: TokenSubject<'_>,
    config: &JwtConfig,
) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
    issue(subject, TokenKind::Access, config.access_ttl_secs(), config)
}

/// Generate a long-lived HS256 refresh token bound to the same session.
pub fn generate_refresh_token(
    subject: TokenSubject<'_>,
    config: &JwtConfig,
) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
    issue(subject, TokenKind::Refresh, config.refresh_ttl_secs(), config)
}

fn decode_with(
    token: &str,
    kind: TokenKind,
    validation: &Validation,
    config: &JwtConfig,
) -> Result<Claims, AuthFailure> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthFailure::TokenExpired,
        _ => AuthFailure::TokenInvalid,
    })?;

    if token_data.claims.kind != kind {
        return Err(AuthFailure::TokenInvalid);
    }
    Ok(token_data.claims)
}

/// Validate signature, expiry and kind, returning the embedded [`Claims`].
///
/// An expired but otherwise valid token yields [`AuthFailure::TokenExpired`];
/// every other problem yields [`AuthFailure::TokenInvalid`].
pub fn validate_token(
    token: &str,
    kind: TokenKind,
    config: &JwtConfig,
) -> Result<Claims, AuthFailure> {
    // Revocations are only held until `exp`; a token must not outlive them.
    let mut validation = Validation::default();
    validation.leeway = 0;
    decode_with(token, kind, &validation, config)
}

/// Validate signature and kind but tolerate an expired `exp`.
///
/// Used by the refresh flow, where the presented access token is expected
/// to have lapsed.
pub fn decode_ignoring_expiry(
    token: &str,
    kind: TokenKind,
    config: &JwtConfig,
) -> Result<Claims, AuthFailure> {
    let mut validation = Validation::default();
    validation.validate_exp = false;
    decode_with(token, kind, &validation, config)
}

/// SHA-256 hex digest of a token, the only form tokens are stored in.
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
