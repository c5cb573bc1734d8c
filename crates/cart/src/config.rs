//! Cart client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `TECHSHELF_API_BASE_URL` - Backend REST API base (default: `http://localhost:8000/api`)
//! - `TECHSHELF_ACCESS_TOKEN` - Bearer token; when set the session starts authenticated
//! - `TECHSHELF_STORAGE_DIR` - Directory for the guest cart (default: `.techshelf`)
//! - `TECHSHELF_UPDATE_DEBOUNCE_MS` - Quantity update debounce window (default: 500)
//! - `TECHSHELF_REQUEST_TIMEOUT_SECS` - HTTP request timeout (default: 30)
//! - `TECHSHELF_PRODUCT_CACHE_TTL_SECS` - Product detail cache TTL (default: 300)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Default backend base URL.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Default debounce window for quantity updates.
pub const DEFAULT_UPDATE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart client configuration.
#[derive(Debug, Clone)]
pub struct CartClientConfig {
    /// Backend API configuration
    pub api: ApiConfig,
    /// Cart manager behaviour
    pub manager: ManagerConfig,
    /// Directory holding the guest cart file
    pub storage_dir: PathBuf,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Backend REST API configuration.
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL every endpoint path is appended to
    pub base_url: Url,
    /// Bearer token for authenticated calls
    pub access_token: Option<SecretString>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// How long product details stay cached
    pub product_cache_ttl: Duration,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url.as_str())
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("request_timeout", &self.request_timeout)
            .field("product_cache_ttl", &self.product_cache_ttl)
            .finish()
    }
}

/// Cart manager behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Window in which successive quantity updates for one product coalesce
    pub update_debounce: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            update_debounce: DEFAULT_UPDATE_DEBOUNCE,
        }
    }
}

impl CartClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api = ApiConfig::from_env()?;
        let manager = ManagerConfig {
            update_debounce: Duration::from_millis(get_parsed_env(
                "TECHSHELF_UPDATE_DEBOUNCE_MS",
                500,
            )?),
        };
        let storage_dir = PathBuf::from(get_env_or_default("TECHSHELF_STORAGE_DIR", ".techshelf"));
        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            api,
            manager,
            storage_dir,
            sentry_dsn,
        })
    }
}

impl ApiConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(
                "TECHSHELF_API_BASE_URL",
                &get_env_or_default("TECHSHELF_API_BASE_URL", DEFAULT_API_BASE_URL),
            )?,
            access_token: get_optional_env("TECHSHELF_ACCESS_TOKEN")
                .filter(|token| !token.trim().is_empty())
                .map(SecretString::from),
            request_timeout: Duration::from_secs(get_parsed_env(
                "TECHSHELF_REQUEST_TIMEOUT_SECS",
                30,
            )?),
            product_cache_ttl: Duration::from_secs(get_parsed_env(
                "TECHSHELF_PRODUCT_CACHE_TTL_SECS",
                300,
            )?),
        })
    }

    /// Configuration for a base URL with default timeouts and no token.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the URL is not http(s).
    pub fn with_base_url(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url("base_url", base_url)?,
            access_token: None,
            request_timeout: Duration::from_secs(30),
            product_cache_ttl: Duration::from_secs(300),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse and validate an http(s) base URL.
fn parse_base_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    let url =
        Url::parse(value).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme: {}", url.scheme()),
        ));
    }
    Ok(url)
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional numeric environment variable.
fn get_parsed_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    get_optional_env(key).map_or(Ok(default), |value| {
        value
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_url_accepts_http() {
        let url = parse_base_url("KEY", "https://shop.example/api").unwrap();
        assert_eq!(url.host_str(), Some("shop.example"));
    }

    #[test]
    fn test_parse_base_url_rejects_other_schemes() {
        let err = parse_base_url("KEY", "ftp://shop.example/api").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "KEY"));
        assert!(parse_base_url("KEY", "not a url").is_err());
    }

    #[test]
    fn test_api_config_debug_redacts_token() {
        let mut config = ApiConfig::with_base_url(DEFAULT_API_BASE_URL).unwrap();
        config.access_token = Some(SecretString::from("super-secret-token"));
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-token"));
    }

    #[test]
    fn test_manager_config_default_debounce() {
        assert_eq!(
            ManagerConfig::default().update_debounce,
            Duration::from_millis(500)
        );
    }
}
