//! Application configuration loaded from environment variables.

use std::time::Duration;

use service::FailurePolicy;
use thiserror::Error;

/// Errors raised by malformed configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL URL; unset selects the in-memory store
/// - `LOCK_TIMEOUT_MS`: product lock wait (default: `5000`)
/// - `OUT_OF_STOCK_RECIPIENT`: notification destination (default: `stock@made.com`)
/// - `HANDLER_FAILURE_POLICY`: `continue` or `abort` (default: `continue`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub lock_timeout: Duration,
    pub out_of_stock_recipient: String,
    pub failure_policy: FailurePolicy,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(value) => value
                .parse::<u16>()
                .map_err(|e| invalid("PORT", &value, e.to_string()))?,
            None => defaults.port,
        };

        let lock_timeout = match get("LOCK_TIMEOUT_MS") {
            Some(value) => Duration::from_millis(
                value
                    .parse::<u64>()
                    .map_err(|e| invalid("LOCK_TIMEOUT_MS", &value, e.to_string()))?,
            ),
            None => defaults.lock_timeout,
        };

        let failure_policy = match get("HANDLER_FAILURE_POLICY") {
            Some(value) => value
                .parse::<FailurePolicy>()
                .map_err(|reason| invalid("HANDLER_FAILURE_POLICY", &value, reason))?,
            None => defaults.failure_policy,
        };

        let log_format = match get("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
            Some(format) if format == "json" => LogFormat::Json,
            Some(format) if format == "pretty" => LogFormat::Pretty,
            Some(other) => return Err(invalid("LOG_FORMAT", &other, "expected pretty or json")),
            None => defaults.log_format,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: get("DATABASE_URL"),
            lock_timeout,
            out_of_stock_recipient: get("OUT_OF_STOCK_RECIPIENT")
                .unwrap_or(defaults.out_of_stock_recipient),
            failure_policy,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            lock_timeout: Duration::from_millis(5000),
            out_of_stock_recipient: service::handlers::DEFAULT_OUT_OF_STOCK_RECIPIENT.to_string(),
            failure_policy: FailurePolicy::Continue,
        }
    }
}
