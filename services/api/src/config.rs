//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use hbd_core::auth::{DEFAULT_TOKEN_HOURS, MAX_TOKEN_HOURS};
use hbd_core::MasterKey;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

/// `DATABASE_URL` prefix that selects the in-memory store.
pub const MEMORY_STORE_PREFIX: &str = "memory:";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub master_key: Arc<MasterKey>,
    pub log_level: Level,
    pub default_token_hours: i64,
    pub retain_secret: bool,
    pub reminder_interval: Duration,
    pub rate_limit_max: usize,
    pub rate_limit_window: Duration,
    pub telegram_api_base: String,
    /// Keep outgoing messages in memory instead of calling Telegram.
    pub telegram_dry_run: bool,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Server, storage and key material ---
        let bind_address: SocketAddr = parse_or("BIND_ADDRESS", "0.0.0.0:8417")?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let master_key_hex = std::env::var("MASTER_KEY")
            .map_err(|_| ConfigError::MissingVar("MASTER_KEY".to_string()))?;
        let master_key = MasterKey::from_hex(master_key_hex.trim())
            .map_err(|e| ConfigError::InvalidValue("MASTER_KEY".to_string(), e.to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Sessions and secrets ---
        let default_token_hours: i64 = parse_or("DEFAULT_TOKEN_HOURS", &DEFAULT_TOKEN_HOURS.to_string())?;
        if !(1..=MAX_TOKEN_HOURS).contains(&default_token_hours) {
            return Err(ConfigError::InvalidValue(
                "DEFAULT_TOKEN_HOURS".to_string(),
                format!("must be between 1 and {}", MAX_TOKEN_HOURS),
            ));
        }
        let retain_secret: bool = parse_or("RETAIN_SECRET", "false")?;

        // --- Scheduler and rate limiting ---
        let interval_secs: u64 = parse_or("REMINDER_INTERVAL_SECS", "60")?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "REMINDER_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let rate_limit_max: usize = parse_or("RATE_LIMIT_MAX", "5")?;
        let rate_limit_window_ms: u64 = parse_or("RATE_LIMIT_WINDOW_MS", "1000")?;

        // --- Outbound transport and CORS ---
        let telegram_api_base = std::env::var("TELEGRAM_API_BASE")
            .unwrap_or_else(|_| "https://api.telegram.org".to_string())
            .trim_end_matches('/')
            .to_string();
        let telegram_dry_run: bool = parse_or("TELEGRAM_DRY_RUN", "false")?;
        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            master_key: Arc::new(master_key),
            log_level,
            default_token_hours,
            retain_secret,
            reminder_interval: Duration::from_secs(interval_secs),
            rate_limit_max,
            rate_limit_window: Duration::from_millis(rate_limit_window_ms),
            telegram_api_base,
            telegram_dry_run,
            cors_origin,
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url.starts_with(MEMORY_STORE_PREFIX)
    }
}

fn parse_or<T>(var: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_to_default() {
        let value: u64 = parse_or("HBD_TEST_UNSET_VARIABLE", "42").unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn parse_or_reports_the_variable_name() {
        std::env::set_var("HBD_TEST_BAD_NUMBER", "forty-two");
        let err = parse_or::<u64>("HBD_TEST_BAD_NUMBER", "1").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref v, _) if v == "HBD_TEST_BAD_NUMBER"));
    }
}
