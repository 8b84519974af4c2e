#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::ServiceExt;

use tether_api::auth::credentials::{
    Account, CredentialError, CredentialRequest, CredentialVerifier,
};
use tether_api::auth::jwt::JwtConfig;
use tether_api::config::{ServerConfig, SessionSettings};
use tether_api::router::build_app_router;
use tether_api::state::AppState;
use tether_api::ws::notifier::TerminationNotifier;
use tether_api::ws::WsManager;
use tether_core::types::DbId;
use tether_db::store::{MemorySessionStore, SessionStore};

pub const DEFAULT_TENANT: &str = "default";
pub const DEFAULT_TENANT_ID: DbId = 1;
pub const PASSWORD: &str = "fixture-password-1";

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

struct FixtureAccount {
    account: Account,
    password: String,
    disabled: bool,
    locked: bool,
}

/// In-memory credential verifier with plaintext fixture passwords.
#[derive(Default)]
pub struct FixtureCredentials {
    accounts: Mutex<HashMap<(String, String), FixtureAccount>>,
}

impl FixtureCredentials {
    pub async fn add_user(&self, user_id: DbId, username: &str, role: &str) -> Account {
        self.add(DEFAULT_TENANT, DEFAULT_TENANT_ID, user_id, username, role, false)
            .await
    }

    pub async fn add(
        &self,
        tenant_key: &str,
        tenant_id: DbId,
        user_id: DbId,
        username: &str,
        role: &str,
        must_change_password: bool,
    ) -> Account {
        let account = Account {
            user_id,
            tenant_id,
            username: username.to_string(),
            email: format!("{username}@test.com"),
            role: role.to_string(),
            must_change_password,
        };
        self.accounts.lock().await.insert(
            (tenant_key.to_string(), username.to_string()),
            FixtureAccount {
                account: account.clone(),
                password: PASSWORD.to_string(),
                disabled: false,
                locked: false,
            },
        );
        account
    }

    pub async fn disable(&self, username: &str) {
        if let Some(a) = self
            .accounts
            .lock()
            .await
            .get_mut(&(DEFAULT_TENANT.to_string(), username.to_string()))
        {
            a.disabled = true;
        }
    }

    pub async fn lock(&self, username: &str) {
        if let Some(a) = self
            .accounts
            .lock()
            .await
            .get_mut(&(DEFAULT_TENANT.to_string(), username.to_string()))
        {
            a.locked = true;
        }
    }

    pub async fn password_of(&self, username: &str) -> Option<String> {
        self.accounts
            .lock()
            .await
            .get(&(DEFAULT_TENANT.to_string(), username.to_string()))
            .map(|a| a.password.clone())
    }
}

#[async_trait]
impl CredentialVerifier for FixtureCredentials {
    async fn verify(&self, request: CredentialRequest<'_>) -> Result<Account, CredentialError> {
        let tenant = request.tenant.unwrap_or(DEFAULT_TENANT).to_string();
        let accounts = self.accounts.lock().await;
        let entry = accounts
            .get(&(tenant, request.username.to_string()))
            .ok_or(CredentialError::NotFound)?;
        if entry.disabled {
            return Err(CredentialError::Disabled);
        }
        if entry.locked {
            return Err(CredentialError::Locked);
        }
        if entry.password != request.password {
            return Err(CredentialError::BadCredentials);
        }
        Ok(entry.account.clone())
    }

    async fn set_password(
        &self,
        account: &Account,
        new_password: &str,
    ) -> Result<(), CredentialError> {
        let mut accounts = self.accounts.lock().await;
        let entry = accounts
            .values_mut()
            .find(|a| {
                a.account.user_id == account.user_id && a.account.tenant_id == account.tenant_id
            })
            .ok_or(CredentialError::NotFound)?;
        entry.password = new_password.to_string();
        entry.account.must_change_password = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

pub fn test_jwt() -> JwtConfig {
    JwtConfig {
        secret: "integration-test-secret-long-enough".to_string(),
        access_token_expiry_mins: 15,
        refresh_token_expiry_days: 7,
    }
}

/// A test `ServerConfig` with a fast retry policy and no widening delay.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: test_jwt(),
        session: SessionSettings {
            login_retry_base_ms: 2,
            login_retry_max_ms: 20,
            login_widen_delay_ms: 0,
            ..SessionSettings::default()
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub credentials: Arc<FixtureCredentials>,
    pub ws_manager: Arc<WsManager>,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

/// Build the full router over the in-memory store with broadcasts enabled.
pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config(), Arc::new(MemorySessionStore::new()), true)
}

/// Build the full router with an explicit config, session store and
/// broadcast switch.
pub fn build_test_app_with(
    config: ServerConfig,
    sessions: Arc<dyn SessionStore>,
    broadcasts: bool,
) -> TestApp {
    let credentials = Arc::new(FixtureCredentials::default());
    let ws_manager = Arc::new(WsManager::new());
    let notifier = if broadcasts {
        TerminationNotifier::spawn(Arc::clone(&ws_manager)).0
    } else {
        TerminationNotifier::disabled()
    };

    let state = AppState::new(
        config.clone(),
        sessions,
        Arc::clone(&credentials) as Arc<dyn CredentialVerifier>,
        Arc::clone(&ws_manager),
        notifier,
    );
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        credentials,
        ws_manager,
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    send(app, Method::POST, uri, Some(body), &[]).await
}

pub async fn post_json_auth(app: Router, uri: &str, body: Value, token: &str) -> Response {
    let bearer = format!("Bearer {token}");
    send(
        app,
        Method::POST,
        uri,
        Some(body),
        &[("authorization", bearer.as_str())],
    )
    .await
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, None, &[]).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response {
    let bearer = format!("Bearer {token}");
    send(app, Method::GET, uri, None, &[("authorization", bearer.as_str())]).await
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Value of the `refresh_token` cookie set by a login response.
pub fn refresh_cookie_of(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix("refresh_token="))
        .and_then(|rest| rest.split(';').next())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Log in through the API. Returns the response body and the refresh cookie.
pub async fn login(app: Router, username: &str, device_session_id: Option<&str>) -> (Value, String) {
    let mut body = serde_json::json!({ "username": username, "password": PASSWORD });
    if let Some(device) = device_session_id {
        body["device_session_id"] = Value::from(device);
    }
    let response = post_json(app, "/api/v1/auth/login", body).await;
    assert_eq!(response.status(), axum::http::StatusCode::OK, "login must succeed");
    let cookie = refresh_cookie_of(&response).expect("login sets the refresh cookie");
    (body_json(response).await, cookie)
}
