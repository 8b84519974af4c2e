use std::time::Duration;

use tether_core::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES};

use crate::auth::jwt::JwtConfig;
use crate::auth::login::{LoginSettings, DEFAULT_WIDEN_DELAY};
use crate::auth::revocation::DEFAULT_MAX_ENTRIES;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    pub jwt: JwtConfig,
    pub session: SessionSettings,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host,
            port: env_or("PORT", 3000),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            jwt: JwtConfig::from_env(),
            session: SessionSettings::from_env(),
        }
    }
}

/// Session enforcement tunables.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Tenant used when a login names none.
    pub default_tenant: String,
    /// Conflict retries after the first login attempt.
    pub login_max_retries: u32,
    pub login_retry_base_ms: u64,
    pub login_retry_max_ms: u64,
    pub login_widen_delay_ms: u64,
    pub sweep_interval_secs: u64,
    /// Minimum gap between repeated sweeper log lines for one unchanged grouping.
    pub sweep_log_cooldown_secs: u64,
    pub revocation_max_entries: usize,
    pub heartbeat_interval_secs: u64,
    /// Mark the refresh cookie `Secure`. Disable only for plain-HTTP development.
    pub secure_cookies: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_tenant: "default".to_string(),
            login_max_retries: DEFAULT_MAX_RETRIES,
            login_retry_base_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            login_retry_max_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
            login_widen_delay_ms: DEFAULT_WIDEN_DELAY.as_millis() as u64,
            sweep_interval_secs: 5,
            sweep_log_cooldown_secs: 60,
            revocation_max_entries: DEFAULT_MAX_ENTRIES,
            heartbeat_interval_secs: 30,
            secure_cookies: true,
        }
    }
}

impl SessionSettings {
    /// Load session settings from environment variables.
    ///
    /// | Env Var                   | Default   |
    /// |---------------------------|-----------|
    /// | `DEFAULT_TENANT`          | `default` |
    /// | `LOGIN_MAX_RETRIES`       | `2`       |
    /// | `LOGIN_RETRY_BASE_MS`     | `40`      |
    /// | `LOGIN_RETRY_MAX_MS`      | `1000`    |
    /// | `LOGIN_WIDEN_DELAY_MS`    | `25`      |
    /// | `SWEEP_INTERVAL_SECS`     | `5`       |
    /// | `SWEEP_LOG_COOLDOWN_SECS` | `60`      |
    /// | `REVOCATION_MAX_ENTRIES`  | `100000`  |
    /// | `HEARTBEAT_INTERVAL_SECS` | `30`      |
    /// | `SECURE_COOKIES`          | `true`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_tenant: std::env::var("DEFAULT_TENANT").unwrap_or(defaults.default_tenant),
            login_max_retries: env_or("LOGIN_MAX_RETRIES", defaults.login_max_retries),
            login_retry_base_ms: env_or("LOGIN_RETRY_BASE_MS", defaults.login_retry_base_ms),
            login_retry_max_ms: env_or("LOGIN_RETRY_MAX_MS", defaults.login_retry_max_ms),
            login_widen_delay_ms: env_or("LOGIN_WIDEN_DELAY_MS", defaults.login_widen_delay_ms),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            sweep_log_cooldown_secs: env_or(
                "SWEEP_LOG_COOLDOWN_SECS",
                defaults.sweep_log_cooldown_secs,
            ),
            revocation_max_entries: env_or(
                "REVOCATION_MAX_ENTRIES",
                defaults.revocation_max_entries,
            ),
            heartbeat_interval_secs: env_or(
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            ),
            secure_cookies: env_or("SECURE_COOKIES", defaults.secure_cookies),
        }
    }

    pub fn login_settings(&self) -> LoginSettings {
        LoginSettings {
            retry: RetryPolicy {
                max_retries: self.login_max_retries,
                base_delay: Duration::from_millis(self.login_retry_base_ms),
                max_delay: Duration::from_millis(self.login_retry_max_ms),
            },
            widen_delay: Duration::from_millis(self.login_widen_delay_ms),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn sweep_log_cooldown(&self) -> Duration {
        Duration::from_secs(self.sweep_log_cooldown_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Parse an environment variable, falling back to `default` when unset.
///
/// # Panics
///
/// Panics if the variable is set but does not parse, so misconfiguration
/// fails at startup.
fn env_or<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid {}: {e}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_login_settings() {
        let settings = SessionSettings::default().login_settings();
        assert_eq!(settings.retry.max_retries, 2);
        assert_eq!(settings.retry.max_attempts(), 3);
        assert_eq!(settings.widen_delay, Duration::from_millis(25));
    }

    #[test]
    fn default_background_intervals() {
        let settings = SessionSettings::default();
        assert_eq!(settings.sweep_interval(), Duration::from_secs(5));
        assert_eq!(settings.sweep_log_cooldown(), Duration::from_secs(60));
        assert_eq!(settings.heartbeat_interval(), Duration::from_secs(30));
    }
}
