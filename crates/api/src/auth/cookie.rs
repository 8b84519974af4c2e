use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};

pub const REFRESH_COOKIE: &str = "refresh_token";

/// Path the refresh cookie is scoped to.
pub const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";

/// `Set-Cookie` value carrying a refresh token.
pub fn refresh_cookie(token: &str, max_age_secs: i64, secure: bool) -> Option<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{REFRESH_COOKIE}={token}; HttpOnly{secure}; SameSite=Strict; Path={REFRESH_COOKIE_PATH}; Max-Age={max_age_secs}"
    ))
    .ok()
}

/// `Set-Cookie` value that deletes the refresh cookie.
pub fn clear_refresh_cookie(secure: bool) -> HeaderValue {
    let value = if secure {
        "refresh_token=; HttpOnly; Secure; SameSite=Strict; Path=/api/v1/auth; Max-Age=0"
    } else {
        "refresh_token=; HttpOnly; SameSite=Strict; Path=/api/v1/auth; Max-Age=0"
    };
    HeaderValue::from_static(value)
}

/// Read a cookie value from the request's `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}
