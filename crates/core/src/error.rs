use std::fmt;

/// Why an authentication attempt or an authenticated request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Username or password did not match.
    BadCredentials,
    /// No bearer token was presented.
    MissingToken,
    /// Token signature, structure or kind is wrong.
    TokenInvalid,
    /// Token was well-formed but its `exp` has passed.
    TokenExpired,
    /// Token is on the revocation list.
    TokenRevoked,
    /// The session the token belongs to is no longer the active one.
    NoActiveSession,
    /// Refresh credential missing, mismatched or not issued for this session.
    RefreshRejected,
}

impl AuthFailure {
    /// Machine-readable error code sent to clients.
    pub fn code(self) -> &'static str {
        match self {
            AuthFailure::TokenExpired => "TOKEN_EXPIRED",
            _ => "UNAUTHORIZED",
        }
    }

    /// Generic, client-safe message.
    pub fn message(self) -> &'static str {
        match self {
            AuthFailure::BadCredentials => "Invalid username or password",
            AuthFailure::MissingToken => "Missing Authorization header",
            AuthFailure::TokenInvalid => "Invalid token",
            AuthFailure::TokenExpired => "Token has expired",
            AuthFailure::TokenRevoked => "Token has been revoked",
            AuthFailure::NoActiveSession => "Session is no longer active",
            AuthFailure::RefreshRejected => "Invalid or expired refresh token",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Authentication(AuthFailure),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Service busy: {0}")]
    TransientBusy(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn auth(failure: AuthFailure) -> Self {
        CoreError::Authentication(failure)
    }
}
