//! Handlers for the `/auth` resource (login, refresh, logout, session).

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tether_core::error::AuthFailure;
use tether_core::types::{DbId, SessionId, Timestamp};

use crate::auth::cookie::{clear_refresh_cookie, read_cookie, refresh_cookie, REFRESH_COOKIE};
use crate::auth::credentials::Account;
use crate::auth::login::{LoginCommand, LoginOutcome, RefreshedSession};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{bearer_token, AuthUser};
use crate::middleware::client::ClientMeta;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Required when the account must change its password.
    pub new_password: Option<String>,
    /// Public tenant key. Omit for the default tenant.
    pub unique_admin_id: Option<String>,
    /// Device session to join, e.g. from another tab of the same browser.
    pub device_session_id: Option<String>,
}

/// Public user info embedded in a login response.
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: DbId,
    pub tenant_id: DbId,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl From<Account> for UserInfo {
    fn from(account: Account) -> Self {
        Self {
            id: account.user_id,
            tenant_id: account.tenant_id,
            username: account.username,
            email: account.email,
            role: account.role,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LoginResponse {
    FirstLogin {
        is_first_login: bool,
        user_id: DbId,
        username: String,
    },
    Established {
        is_first_login: bool,
        access_token: String,
        session_id: SessionId,
        device_session_id: String,
        /// Access token lifetime in seconds.
        expires_in: i64,
        user: UserInfo,
    },
}

/// Optional body for `POST /auth/refresh` when the cookie is unavailable.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Request body for `POST /auth/logout`.
#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub session_id: SessionId,
}

/// Response for `GET /auth/session`.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub user_id: DbId,
    pub tenant_id: DbId,
    pub session_id: SessionId,
    pub device_session_id: String,
    pub role: String,
    /// Expiry of the presented access token.
    pub expires_at: Timestamp,
    pub issued_at: Option<Timestamp>,
    pub refreshed_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/auth/login
///
/// Authenticate and become the account's only active session. The refresh
/// token is returned as an HttpOnly cookie.
pub async fn login(
    State(state): State<AppState>,
    client: ClientMeta,
    Json(input): Json<LoginRequest>,
) -> AppResult<Response> {
    let outcome = state
        .coordinator
        .login(LoginCommand {
            username: input.username,
            password: input.password,
            new_password: input.new_password,
            tenant: input.unique_admin_id,
            device_session_id: input.device_session_id,
            client,
        })
        .await?;

    match outcome {
        LoginOutcome::FirstLogin { user_id, username } => Ok(Json(LoginResponse::FirstLogin {
            is_first_login: true,
            user_id,
            username,
        })
        .into_response()),
        LoginOutcome::Established(issued) => {
            let cookie = refresh_cookie(
                &issued.refresh_token,
                issued.refresh_expires_in,
                state.config.session.secure_cookies,
            )
            .ok_or_else(|| AppError::InternalError("Refresh token is not a valid cookie".into()))?;

            let body = LoginResponse::Established {
                is_first_login: false,
                access_token: issued.access_token,
                session_id: issued.session_id,
                device_session_id: issued.device_session_id,
                expires_in: issued.expires_in,
                user: UserInfo::from(issued.account),
            };
            Ok(([(SET_COOKIE, cookie)], Json(body)).into_response())
        }
    }
}

/// POST /api/v1/auth/refresh
///
/// Exchange the refresh cookie (or `refresh_token` body field) and the
/// current, possibly expired, bearer token for a new access token.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<RefreshedSession>> {
    let access_token = bearer_token(&headers)?;

    let from_body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {e}")))?
            .refresh_token
    };
    let refresh_token = read_cookie(&headers, REFRESH_COOKIE)
        .or(from_body)
        .ok_or_else(|| AppError::auth(AuthFailure::RefreshRejected))?;

    let refreshed = state
        .coordinator
        .refresh(access_token, &refresh_token)
        .await?;
    Ok(Json(refreshed))
}

/// POST /api/v1/auth/logout
///
/// End the caller's session. Returns 204 No Content.
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
    Json(input): Json<LogoutRequest>,
) -> AppResult<Response> {
    state.coordinator.logout(&session, input.session_id).await?;
    let cookie = clear_refresh_cookie(state.config.session.secure_cookies);
    Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]).into_response())
}

/// GET /api/v1/auth/session
pub async fn current_session(
    State(state): State<AppState>,
    AuthUser(session): AuthUser,
) -> AppResult<Json<SessionInfo>> {
    let record = state.sessions.find_by_session_id(session.session_id).await?;
    let (issued_at, refreshed_at) = record
        .map(|r| (Some(r.config.issued_at), r.config.refreshed_at))
        .unwrap_or((None, None));

    Ok(Json(SessionInfo {
        user_id: session.user_id,
        tenant_id: session.tenant_id,
        session_id: session.session_id,
        device_session_id: session.device_session_id,
        role: session.role,
        expires_at: session.expires_at,
        issued_at,
        refreshed_at,
    }))
}
