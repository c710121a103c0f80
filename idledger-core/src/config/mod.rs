//! Configuration for the identity ledger
//!
//! Defaults, TOML files and `IDLEDGER_*` environment overrides, validated
//! before use.

use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Storage configuration
    pub store: StoreConfig,

    /// Pre-key issuance configuration
    pub prekeys: PreKeyConfig,

    /// Revocation record retention
    pub revocations: RevocationConfig,

    /// Commit notification delivery
    pub notifications: NotificationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file; `None` keeps the ledger in memory
    pub database_path: Option<PathBuf>,

    /// Maximum pooled connections (in-memory stores always use one)
    pub pool_max_size: u32,

    /// How long a unit-of-work waits for the write lock
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
}

/// Pre-key issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreKeyConfig {
    /// Validity of a freshly issued pre-key
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,

    /// Issue a replacement once the latest key expires within this margin
    #[serde(with = "humantime_serde")]
    pub renewal_margin: Duration,
}

/// Revocation record retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Records older than this are pruned
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

/// Commit notification delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Events buffered per subscriber of the broadcaster
    pub channel_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            pool_max_size: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for PreKeyConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(60 * 24 * 3600),
            renewal_margin: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { channel_capacity: 256 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

fn parse_env_duration(name: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(raw) => humantime_serde::re::humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: IDLEDGER_<SECTION>_<KEY>
    /// Example: IDLEDGER_STORE_DATABASE_PATH=/var/lib/idledger/ledger.db
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `IDLEDGER_*` overrides on top of the current values
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = env::var("IDLEDGER_STORE_DATABASE_PATH") {
            self.store.database_path = Some(PathBuf::from(path));
        }
        if let Some(size) = parse_env("IDLEDGER_STORE_POOL_MAX_SIZE")? {
            self.store.pool_max_size = size;
        }
        if let Some(timeout) = parse_env_duration("IDLEDGER_STORE_BUSY_TIMEOUT")? {
            self.store.busy_timeout = timeout;
        }

        if let Some(lifetime) = parse_env_duration("IDLEDGER_PREKEYS_LIFETIME")? {
            self.prekeys.lifetime = lifetime;
        }
        if let Some(margin) = parse_env_duration("IDLEDGER_PREKEYS_RENEWAL_MARGIN")? {
            self.prekeys.renewal_margin = margin;
        }

        if let Some(retention) = parse_env_duration("IDLEDGER_REVOCATIONS_RETENTION")? {
            self.revocations.retention = retention;
        }

        if let Some(capacity) = parse_env("IDLEDGER_NOTIFICATIONS_CHANNEL_CAPACITY")? {
            self.notifications.channel_capacity = capacity;
        }

        if let Ok(level) = env::var("IDLEDGER_LOGGING_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("IDLEDGER_LOGGING_JSON_FORMAT")? {
            self.logging.json_format = json;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.pool_max_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "pool_max_size must be greater than 0".to_string(),
            ));
        }

        if self.prekeys.lifetime.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "pre-key lifetime must be greater than 0".to_string(),
            ));
        }

        if self.prekeys.renewal_margin >= self.prekeys.lifetime {
            return Err(ConfigError::ValidationFailed(
                "pre-key renewal_margin must be shorter than lifetime".to_string(),
            ));
        }

        if self.notifications.channel_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }

        if let Err(e) = self.logging.level.parse::<LogLevel>() {
            return Err(ConfigError::ValidationFailed(format!("Invalid log level: {}", e)));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
