//! Service configuration parsed from environment variables.
//!
//! `main` loads an optional `.env` file first, so every value here can come
//! from either the process environment or that file.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-KEY";
pub const DEFAULT_BACKEND_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_BACKEND_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BACKEND_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Where in-progress sign-up sessions live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStoreKind {
    Postgres,
    Memory,
}

/// Service API key used for every call to the healthcare backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyConfig {
    pub header_name: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: ApiKeyConfig,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl BackendConfig {
    /// Build backend config from the environment.
    ///
    /// Required: `BACKEND_API_KEY`.
    ///
    /// Optional:
    /// - `BACKEND_BASE_URL`: default `http://localhost:8080`
    /// - `BACKEND_API_KEY_HEADER`: default `X-API-KEY`
    /// - `BACKEND_REQUEST_TIMEOUT_SECS`: default 30
    /// - `BACKEND_CONNECT_TIMEOUT_SECS`: default 10
    pub fn from_env() -> Result<Self, ConfigError> {
        let key = std::env::var("BACKEND_API_KEY").map_err(|_| ConfigError::Missing("BACKEND_API_KEY"))?;
        let header_name =
            std::env::var("BACKEND_API_KEY_HEADER").unwrap_or_else(|_| DEFAULT_API_KEY_HEADER.to_owned());
        let base_url = std::env::var("BACKEND_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BACKEND_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();

        Ok(Self {
            base_url,
            api_key: ApiKeyConfig { header_name, key },
            request_timeout: Duration::from_secs(env_parse(
                "BACKEND_REQUEST_TIMEOUT_SECS",
                DEFAULT_BACKEND_REQUEST_TIMEOUT_SECS,
            )),
            connect_timeout: Duration::from_secs(env_parse(
                "BACKEND_CONNECT_TIMEOUT_SECS",
                DEFAULT_BACKEND_CONNECT_TIMEOUT_SECS,
            )),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub session_store: SessionStoreKind,
    pub backend: BackendConfig,
    /// Key guarding the admin routes. Admin routes answer 404 when unset.
    pub admin_api_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid { key: "PORT", value: raw })?,
            Err(_) => DEFAULT_PORT,
        };
        let session_store = parse_session_store(std::env::var("SIGNUP_SESSION_STORE").ok().as_deref())?;

        Ok(Self {
            database_url,
            port,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            session_store,
            backend: BackendConfig::from_env()?,
            admin_api_key: std::env::var("ADMIN_API_KEY").ok().filter(|k| !k.is_empty()),
        })
    }
}

fn parse_session_store(raw: Option<&str>) -> Result<SessionStoreKind, ConfigError> {
    match raw.unwrap_or("postgres") {
        "postgres" => Ok(SessionStoreKind::Postgres),
        "memory" => Ok(SessionStoreKind::Memory),
        other => Err(ConfigError::Invalid { key: "SIGNUP_SESSION_STORE", value: other.to_owned() }),
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

/// Whether cookies get the `Secure` flag.
///
/// `COOKIE_SECURE` wins; otherwise inferred from an https Google redirect URI.
#[must_use]
pub fn cookie_secure() -> bool {
    if let Some(value) = env_bool("COOKIE_SECURE") {
        return value;
    }

    std::env::var("GOOGLE_REDIRECT_URI")
        .map(|uri| uri.starts_with("https://"))
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
