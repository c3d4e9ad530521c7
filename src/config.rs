//! Runtime configuration parsed from environment variables.
//!
//! Every external service is optional: without auth settings the app runs in
//! guest-only mode, without a generator key it uses the offline templates.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_SAFETY_TIMEOUT_MS: u64 = 2_500;
pub const DEFAULT_DATA_DIR: &str = ".passgen";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Errors produced while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A URL variable is set but is not an `http(s)` URL.
    #[error("invalid URL in {var}: {value}")]
    InvalidUrl { var: &'static str, value: String },

    /// Only one half of the auth service settings is present.
    #[error("{present} is set but {missing} is not")]
    IncompleteAuth { present: &'static str, missing: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

impl HttpTimeouts {
    /// Build an HTTP client with these timeouts.
    ///
    /// # Errors
    ///
    /// Returns the underlying `reqwest` error if the TLS backend fails to initialize.
    pub fn client(self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_secs))
            .connect_timeout(Duration::from_secs(self.connect_secs))
            .build()
    }
}

/// Supabase-compatible auth/database service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Project base URL without trailing slash.
    pub url: String,
    /// Publishable (anon) API key.
    pub api_key: String,
}

/// Remote password generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub auth: Option<AuthConfig>,
    pub generator: Option<GeminiConfig>,
    pub safety_timeout: Duration,
    pub data_dir: PathBuf,
    pub http: HttpTimeouts,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `SUPABASE_URL` / `SUPABASE_KEY` (or the `VITE_` prefixed names): auth service
    /// - `GEMINI_API_KEY`, `GEMINI_MODEL`, `GEMINI_BASE_URL`: remote generator
    /// - `PASSGEN_SAFETY_TIMEOUT_MS`: default 2500
    /// - `PASSGEN_DATA_DIR`: default `.passgen`
    /// - `PASSGEN_REQUEST_TIMEOUT_SECS`: default 30
    /// - `PASSGEN_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for malformed URLs or half-configured auth.
    pub fn from_env() -> Result<Self, ConfigError> {
        let auth = auth_from_env()?;
        let generator = generator_from_env()?;
        let safety_timeout = Duration::from_millis(env_parse("PASSGEN_SAFETY_TIMEOUT_MS", DEFAULT_SAFETY_TIMEOUT_MS));
        let data_dir = env_string("PASSGEN_DATA_DIR").map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);
        let http = HttpTimeouts {
            request_secs: env_parse("PASSGEN_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse("PASSGEN_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        Ok(Self { auth, generator, safety_timeout, data_dir, http })
    }
}

fn auth_from_env() -> Result<Option<AuthConfig>, ConfigError> {
    let url = env_string("SUPABASE_URL").or_else(|| env_string("VITE_SUPABASE_URL"));
    let key = env_string("SUPABASE_KEY").or_else(|| env_string("VITE_SUPABASE_KEY"));
    match (url, key) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::IncompleteAuth { present: "SUPABASE_URL", missing: "SUPABASE_KEY" }),
        (None, Some(_)) => Err(ConfigError::IncompleteAuth { present: "SUPABASE_KEY", missing: "SUPABASE_URL" }),
        (Some(url), Some(api_key)) => Ok(Some(AuthConfig { url: normalize_url("SUPABASE_URL", &url)?, api_key })),
    }
}

fn generator_from_env() -> Result<Option<GeminiConfig>, ConfigError> {
    let Some(api_key) = env_string("GEMINI_API_KEY") else {
        return Ok(None);
    };
    let model = env_string("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_owned());
    let base_url = match env_string("GEMINI_BASE_URL") {
        Some(raw) => normalize_url("GEMINI_BASE_URL", &raw)?,
        None => DEFAULT_GEMINI_BASE_URL.to_owned(),
    };
    Ok(Some(GeminiConfig { api_key, model, base_url }))
}

/// Validate an `http(s)` base URL with a host; returns it without the
/// trailing slash.
fn normalize_url(var: &'static str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let invalid = || ConfigError::InvalidUrl { var, value: raw.to_owned() };
    let parsed = reqwest::Url::parse(trimmed).map_err(|_| invalid())?;
    let has_host = parsed.host_str().is_some_and(|host| !host.is_empty());
    if !matches!(parsed.scheme(), "http" | "https") || !has_host {
        return Err(invalid());
    }
    Ok(trimmed.to_owned())
}

/// Non-empty value of `key`, trimmed.
fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_owned()),
        _ => None,
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    let Ok(raw) = std::env::var(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, raw = %raw, "invalid value; using default");
            default
        }
    }
}
