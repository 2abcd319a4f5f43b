//! Persistence configuration loaded from YAML, `.env` and environment variables.
//!
//! Resolution order (lowest to highest priority):
//! 1. built-in defaults
//! 2. the `persistence` section of a YAML file
//! 3. `.env` file (loaded into the process environment)
//! 4. environment variables (`PERSISTENCE_URL` overrides `persistence.url`)
//!
//! `.env` files never overwrite already-set environment variables.

use std::path::Path;
use std::str::FromStr;

use crudrepo_data::{DataError, FlushMode};
use serde::Deserialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::SqlxErrorExt;

pub const ENV_URL: &str = "PERSISTENCE_URL";
pub const ENV_MAX_CONNECTIONS: &str = "PERSISTENCE_MAX_CONNECTIONS";
pub const ENV_FLUSH_MODE: &str = "PERSISTENCE_FLUSH_MODE";

/// Errors that can occur while loading the persistence configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// An I/O or YAML parsing error occurred while loading the file.
    Load(String),
    /// A value was present but not acceptable.
    Invalid { key: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "Config load error: {msg}"),
            ConfigError::Invalid { key, message } => {
                write!(f, "Invalid config value for '{key}': {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings for the SQLite pool and the contexts opened on it.
///
/// ```yaml
/// persistence:
///   url: "sqlite://app.db?mode=rwc"
///   max_connections: 4
///   flush_mode: auto
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub url: String,
    pub max_connections: u32,
    pub flush_mode: FlushMode,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            flush_mode: FlushMode::Commit,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    persistence: PersistenceConfig,
}

impl PersistenceConfig {
    /// Parse the `persistence` section of a YAML document.
    ///
    /// A document without the section yields the defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null rather than a mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: ConfigFile =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Load(e.to_string()))?;
        file.persistence.validated()
    }

    /// Load from `path` (when it exists), then `.env`, then environment
    /// variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Load(e.to_string()))?;
            Self::from_yaml_str(&content)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();

        config.apply_env_overrides()?;
        config.validated()
    }

    /// Overlay `PERSISTENCE_*` environment variables onto this config.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var(ENV_URL) {
            self.url = url;
        }
        if let Ok(raw) = std::env::var(ENV_MAX_CONNECTIONS) {
            self.max_connections = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_MAX_CONNECTIONS.into(),
                message: format!("expected a positive integer, got `{raw}`"),
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_FLUSH_MODE) {
            self.flush_mode = FlushMode::from_str(&raw).map_err(|e| ConfigError::Invalid {
                key: ENV_FLUSH_MODE.into(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "persistence.url".into(),
                message: "must not be empty".into(),
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "persistence.max_connections".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(self)
    }
}

/// Build a SQLite pool from `config`.
pub async fn connect(config: &PersistenceConfig) -> Result<SqlitePool, DataError> {
    tracing::info!(
        url = %config.url,
        max_connections = config.max_connections,
        "opening sqlite pool"
    );
    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .map_err(SqlxErrorExt::into_data_error)
}
