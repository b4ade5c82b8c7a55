//! Configuration management
//!
//! Defaults, environment overrides (`ROOMCHAT_<SECTION>_<KEY>`), TOML files
//! and validation for the room store and its ambient services.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub chat: ChatConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Which persistence gateway backs the directories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(ConfigError::InvalidValue {
                key: "store.backend".to_string(),
                reason: format!("unknown backend '{}', expected memory or sqlite", other),
            }),
        }
    }
}

/// Persistence gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// SQLite database file (sqlite backend only)
    pub database_path: PathBuf,

    /// Maximum pooled connections
    pub pool_size: u32,

    /// How long to wait for a pooled connection before reporting the
    /// store as unavailable
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
}

/// Chat domain settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Shortest alias `register` accepts
    pub min_alias_length: usize,

    /// Page size used when a caller does not ask for a specific count
    pub default_page_size: usize,

    /// Name of the room-list document the room directory bootstraps from
    pub room_list_name: String,

    /// Name of the user-list document the user directory bootstraps from
    pub user_list_name: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
    pub with_timestamp: bool,
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Install the Prometheus recorder (CLI only)
    pub enable_prometheus: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            database_path: PathBuf::from("./data/roomchat.db"),
            pool_size: 8,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            min_alias_length: 3,
            default_page_size: 20,
            room_list_name: "all_rooms".to_string(),
            user_list_name: "all_users".to_string(),
        }
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

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_prometheus: false,
        }
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables on top of defaults
    ///
    /// Example: `ROOMCHAT_STORE_DATABASE_PATH=/var/lib/roomchat.db`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay any `ROOMCHAT_*` variables onto this configuration
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(backend) = parse_env::<StoreBackend>("ROOMCHAT_STORE_BACKEND")? {
            self.store.backend = backend;
        }
        if let Ok(path) = env::var("ROOMCHAT_STORE_DATABASE_PATH") {
            self.store.database_path = PathBuf::from(path);
        }
        if let Some(size) = parse_env::<u32>("ROOMCHAT_STORE_POOL_SIZE")? {
            self.store.pool_size = size;
        }
        if let Ok(timeout) = env::var("ROOMCHAT_STORE_CONNECTION_TIMEOUT") {
            self.store.connection_timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| ConfigError::InvalidValue {
                    key: "ROOMCHAT_STORE_CONNECTION_TIMEOUT".to_string(),
                    reason: e.to_string(),
                })?;
        }

        if let Some(len) = parse_env::<usize>("ROOMCHAT_CHAT_MIN_ALIAS_LENGTH")? {
            self.chat.min_alias_length = len;
        }
        if let Some(size) = parse_env::<usize>("ROOMCHAT_CHAT_DEFAULT_PAGE_SIZE")? {
            self.chat.default_page_size = size;
        }

        if let Ok(level) = env::var("ROOMCHAT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env::<bool>("ROOMCHAT_LOG_JSON")? {
            self.logging.json_format = json;
        }

        if let Some(enabled) = parse_env::<bool>("ROOMCHAT_METRICS_ENABLED")? {
            self.metrics.enabled = enabled;
        }
        if let Some(prometheus) = parse_env::<bool>("ROOMCHAT_METRICS_ENABLE_PROMETHEUS")? {
            self.metrics.enable_prometheus = prometheus;
        }
        Ok(())
    }

    /// Load configuration from a TOML file; missing keys take defaults
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.pool_size == 0 {
            return Err(ConfigError::invalid("store", "pool_size must be greater than 0"));
        }

        if self.store.connection_timeout.is_zero() {
            return Err(ConfigError::invalid("store", "connection_timeout must be non-zero"));
        }

        if self.chat.min_alias_length == 0 {
            return Err(ConfigError::invalid("chat", "min_alias_length must be at least 1"));
        }

        if self.chat.room_list_name.is_empty() || self.chat.user_list_name.is_empty() {
            return Err(ConfigError::invalid(
                "chat",
                "room_list_name and user_list_name must not be empty",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::invalid(
                "logging",
                format!("unknown level '{}'", self.logging.level),
            ));
        }

        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.min_alias_length, 3);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.store.pool_size = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.chat.min_alias_length = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roomchat.toml");

        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        config.chat.default_page_size = 50;
        config.store.connection_timeout = Duration::from_millis(1500);
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.store.backend, StoreBackend::Memory);
        assert_eq!(loaded.chat.default_page_size, 50);
        assert_eq!(loaded.store.connection_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[chat]\nmin_alias_length = 5\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.chat.min_alias_length, 5);
        assert_eq!(loaded.chat.default_page_size, 20);
        assert_eq!(loaded.logging.level, "info");
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("SQLite".parse::<StoreBackend>().unwrap(), StoreBackend::Sqlite);
        assert!("mongo".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_error_variants_name_the_problem() {
        let mut config = Config::default();
        config.store.pool_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { section: "store", .. })
        ));

        let missing = Config::from_file("/nonexistent/roomchat.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
        assert!(missing.to_string().contains("/nonexistent/roomchat.toml"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[chat\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse(_))));

        let err = "mongo".parse::<StoreBackend>().unwrap_err();
        assert!(err.to_string().contains("store.backend"));
    }
}
