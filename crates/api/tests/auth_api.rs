//! HTTP-level tests for the `/auth` and `/admin` endpoints.

mod common;

use axum::http::{header, Method, StatusCode};
use common::{
    body_json, build_test_app, get, get_auth, login, post_json, post_json_auth, refresh_cookie_of,
    send, DEFAULT_TENANT, DEFAULT_TENANT_ID, PASSWORD,
};
use serde_json::json;

const LOGIN: &str = "/api/v1/auth/login";
const REFRESH: &str = "/api/v1/auth/refresh";
const LOGOUT: &str = "/api/v1/auth/logout";
const SESSION: &str = "/api/v1/auth/session";

async fn refresh_with_cookie(
    app: axum::Router,
    access_token: &str,
    cookie: &str,
) -> axum::response::Response {
    let bearer = format!("Bearer {access_token}");
    let cookie = format!("refresh_token={cookie}");
    send(
        app,
        Method::POST,
        REFRESH,
        None,
        &[("authorization", bearer.as_str()), ("cookie", cookie.as_str())],
    )
    .await
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_returns_access_token_and_refresh_cookie() {
    let app = build_test_app();
    app.credentials.add_user(1, "alice", "viewer").await;

    let response = post_json(
        app.app(),
        LOGIN,
        json!({ "username": "alice", "password": PASSWORD, "device_session_id": "laptop" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Path=/api/v1/auth"));
    assert!(refresh_cookie_of(&response).is_some());

    let json = body_json(response).await;
    assert_eq!(json["is_first_login"], false);
    assert!(json["access_token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(json["device_session_id"], "laptop");
    assert_eq!(json["expires_in"], 15 * 60);
    assert_eq!(json["user"]["username"], "alice");
    assert_eq!(json["user"]["tenant_id"], DEFAULT_TENANT_ID);
    assert!(json.get("refresh_token").is_none(), "refresh token only travels in the cookie");
}

#[tokio::test]
async fn wrong_password_is_401_with_generic_message() {
    let app = build_test_app();
    app.credentials.add_user(1, "alice", "viewer").await;

    let response = post_json(
        app.app(),
        LOGIN,
        json!({ "username": "alice", "password": "not-the-password" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
    assert_eq!(json["error"], "Invalid username or password");
}

#[tokio::test]
async fn unknown_and_disabled_accounts_are_404() {
    let app = build_test_app();
    app.credentials.add_user(1, "gone", "viewer").await;
    app.credentials.disable("gone").await;

    for username in ["nobody", "gone"] {
        let response = post_json(
            app.app(),
            LOGIN,
            json!({ "username": username, "password": PASSWORD }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{username}");
    }
}

#[tokio::test]
async fn locked_account_is_403() {
    let app = build_test_app();
    app.credentials.add_user(1, "locked", "viewer").await;
    app.credentials.lock("locked").await;

    let response = post_json(
        app.app(),
        LOGIN,
        json!({ "username": "locked", "password": PASSWORD }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn empty_credentials_are_rejected_before_lookup() {
    let app = build_test_app();
    let response = post_json(app.app(), LOGIN, json!({ "username": " ", "password": "" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn oversized_device_session_id_is_rejected() {
    let app = build_test_app();
    app.credentials.add_user(1, "alice", "viewer").await;
    let response = post_json(
        app.app(),
        LOGIN,
        json!({ "username": "alice", "password": PASSWORD, "device_session_id": "d".repeat(200) }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tenant_key_selects_the_account() {
    let app = build_test_app();
    app.credentials
        .add("acme", 7, 70, "shared", "viewer", false)
        .await;

    let missing = post_json(
        app.app(),
        LOGIN,
        json!({ "username": "shared", "password": PASSWORD }),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND, "not in {DEFAULT_TENANT}");

    let response = post_json(
        app.app(),
        LOGIN,
        json!({ "username": "shared", "password": PASSWORD, "unique_admin_id": "acme" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["user"]["tenant_id"], 7);
}

#[tokio::test]
async fn first_login_requires_password_change() {
    let app = build_test_app();
    app.credentials
        .add(DEFAULT_TENANT, DEFAULT_TENANT_ID, 5, "fresh", "viewer", true)
        .await;

    let response = post_json(
        app.app(),
        LOGIN,
        json!({ "username": "fresh", "password": PASSWORD }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(refresh_cookie_of(&response).is_none());
    let json = body_json(response).await;
    assert_eq!(json["is_first_login"], true);
    assert_eq!(json["user_id"], 5);
    assert!(json.get("access_token").is_none());

    // A weak replacement is refused.
    let weak = post_json(
        app.app(),
        LOGIN,
        json!({ "username": "fresh", "password": PASSWORD, "new_password": "short" }),
    )
    .await;
    assert_eq!(weak.status(), StatusCode::BAD_REQUEST);

    let response = post_json(
        app.app(),
        LOGIN,
        json!({ "username": "fresh", "password": PASSWORD, "new_password": "brand-new-pass-42" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["is_first_login"], false);
    assert_eq!(
        app.credentials.password_of("fresh").await.as_deref(),
        Some("brand-new-pass-42")
    );
}

// ---------------------------------------------------------------------------
// Session, refresh, logout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn current_session_describes_the_token() {
    let app = build_test_app();
    app.credentials.add_user(1, "alice", "operator").await;
    let (body, _) = login(app.app(), "alice", Some("tablet")).await;
    let token = body["access_token"].as_str().unwrap();

    let response = get_auth(app.app(), SESSION, token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["user_id"], 1);
    assert_eq!(json["session_id"], body["session_id"]);
    assert_eq!(json["device_session_id"], "tablet");
    assert_eq!(json["role"], "operator");
    assert!(json["issued_at"].is_string());
    assert!(json.get("token").is_none());
}

#[tokio::test]
async fn missing_or_malformed_bearer_is_401() {
    let app = build_test_app();
    let response = get(app.app(), SESSION).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = get_auth(app.app(), SESSION, "not-a-jwt").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn refresh_keeps_session_and_retires_old_access_token() {
    let app = build_test_app();
    app.credentials.add_user(1, "alice", "viewer").await;
    let (body, cookie) = login(app.app(), "alice", None).await;
    let old_token = body["access_token"].as_str().unwrap().to_string();

    let response = refresh_with_cookie(app.app(), &old_token, &cookie).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let new_token = json["access_token"].as_str().unwrap().to_string();
    assert_eq!(json["session_id"], body["session_id"]);
    assert_ne!(new_token, old_token);

    let response = get_auth(app.app(), SESSION, &old_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = get_auth(app.app(), SESSION, &new_token).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["refreshed_at"].is_string());
}

#[tokio::test]
async fn refresh_accepts_body_token() {
    let app = build_test_app();
    app.credentials.add_user(1, "alice", "viewer").await;
    let (body, cookie) = login(app.app(), "alice", None).await;
    let token = body["access_token"].as_str().unwrap();

    let response = post_json_auth(
        app.app(),
        REFRESH,
        json!({ "refresh_token": cookie }),
        token,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_without_refresh_token_is_401() {
    let app = build_test_app();
    app.credentials.add_user(1, "alice", "viewer").await;
    let (body, _) = login(app.app(), "alice", None).await;
    let token = body["access_token"].as_str().unwrap();

    let bearer = format!("Bearer {token}");
    let response = send(
        app.app(),
        Method::POST,
        REFRESH,
        None,
        &[("authorization", bearer.as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_token_of_superseded_session_is_rejected() {
    let app = build_test_app();
    app.credentials.add_user(1, "alice", "viewer").await;
    let (first, first_cookie) = login(app.app(), "alice", Some("phone")).await;
    login(app.app(), "alice", Some("laptop")).await;

    let response = refresh_with_cookie(
        app.app(),
        first["access_token"].as_str().unwrap(),
        &first_cookie,
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_ends_session_and_clears_cookie() {
    let app = build_test_app();
    app.credentials.add_user(1, "alice", "viewer").await;
    let (body, cookie) = login(app.app(), "alice", None).await;
    let token = body["access_token"].as_str().unwrap();

    let response = post_json_auth(
        app.app(),
        LOGOUT,
        json!({ "session_id": body["session_id"] }),
        token,
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cleared = response.headers().get(header::SET_COOKIE).unwrap();
    assert!(cleared.to_str().unwrap().contains("Max-Age=0"));

    let response = get_auth(app.app(), SESSION, token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = refresh_with_cookie(app.app(), token, &cookie).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_of_foreign_session_is_403() {
    let app = build_test_app();
    app.credentials.add_user(1, "alice", "viewer").await;
    let (body, _) = login(app.app(), "alice", None).await;
    let token = body["access_token"].as_str().unwrap();

    let response = post_json_auth(
        app.app(),
        LOGOUT,
        json!({ "session_id": uuid::Uuid::new_v4() }),
        token,
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = get_auth(app.app(), SESSION, token).await;
    assert_eq!(response.status(), StatusCode::OK, "session survives");
}

// ---------------------------------------------------------------------------
// Admin revocation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_revokes_all_sessions_of_a_user() {
    let app = build_test_app();
    app.credentials.add_user(1, "root", "admin").await;
    app.credentials.add_user(2, "bob", "viewer").await;
    let (admin, _) = login(app.app(), "root", None).await;
    let (bob, _) = login(app.app(), "bob", None).await;
    let bob_token = bob["access_token"].as_str().unwrap();

    let response = post_json_auth(
        app.app(),
        "/api/v1/admin/users/2/sessions/revoke",
        json!({}),
        admin["access_token"].as_str().unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["user_id"], 2);
    assert_eq!(json["revoked"], 1);

    let response = get_auth(app.app(), SESSION, bob_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_admin_cannot_revoke() {
    let app = build_test_app();
    app.credentials.add_user(1, "eve", "operator").await;
    app.credentials.add_user(2, "bob", "viewer").await;
    let (eve, _) = login(app.app(), "eve", None).await;
    let (bob, _) = login(app.app(), "bob", None).await;

    let response = post_json_auth(
        app.app(),
        "/api/v1/admin/users/2/sessions/revoke",
        json!({}),
        eve["access_token"].as_str().unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = get_auth(app.app(), SESSION, bob["access_token"].as_str().unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_store_and_connections() {
    let app = build_test_app();
    let response = get(app.app(), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["db_healthy"], true);
    assert_eq!(json["connections"], 0);
}

#[tokio::test]
async fn responses_carry_request_id_and_cors_headers() {
    let app = build_test_app();
    let response = send(
        app.app(),
        Method::GET,
        "/health",
        None,
        &[("origin", "http://localhost:5173")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5173"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    let exposed = headers[header::ACCESS_CONTROL_EXPOSE_HEADERS]
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(exposed.contains("retry-after"), "exposed: {exposed}");
}

#[tokio::test]
async fn incoming_request_id_is_echoed() {
    let app = build_test_app();
    let response = send(
        app.app(),
        Method::GET,
        "/health",
        None,
        &[("x-request-id", "req-123")],
    )
    .await;
    assert_eq!(response.headers()["x-request-id"], "req-123");
}
