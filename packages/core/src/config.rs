//! Store Configuration
//!
//! `StoreConfig` describes where the backing store lives and how sessions
//! opened against it behave. It can be built in code, deserialized from any
//! serde source, or read from `DOCSTORE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default busy timeout applied to every store connection (5 seconds)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Default logical database name
pub const DEFAULT_DATABASE: &str = "main";

/// Environment variable names read by [`StoreConfig::from_env`]
pub const ENV_PATH: &str = "DOCSTORE_PATH";
pub const ENV_DATABASE: &str = "DOCSTORE_DATABASE";
pub const ENV_BUSY_TIMEOUT_MS: &str = "DOCSTORE_BUSY_TIMEOUT_MS";
pub const ENV_TRANSACTION_TIMEOUT_MS: &str = "DOCSTORE_TRANSACTION_TIMEOUT_MS";

/// Configuration for a store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the database file (parent directories are created on connect)
    pub path: PathBuf,

    /// Logical database name; collections are namespaced under it
    pub database: String,

    /// How long a session waits on a locked store before giving up
    pub busy_timeout_ms: u64,

    /// Default deadline for every transaction started from this connection.
    /// `None` means transactions only end when their operations do.
    pub transaction_timeout_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("docstore.db"),
            database: DEFAULT_DATABASE.to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            transaction_timeout_ms: None,
        }
    }
}

impl StoreConfig {
    /// Config for `path` with every other field defaulted
    pub fn new(path: impl Into<PathBuf>, database: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set the default transaction deadline
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Build a config from `DOCSTORE_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let path = env::var(ENV_PATH)
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.path);

        let database = env::var(ENV_DATABASE)
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or(defaults.database);

        let busy_timeout_ms = env::var(ENV_BUSY_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.busy_timeout_ms);

        let transaction_timeout_ms = env::var(ENV_TRANSACTION_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok());

        Self {
            path,
            database,
            busy_timeout_ms,
            transaction_timeout_ms,
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn transaction_timeout(&self) -> Option<Duration> {
        self.transaction_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("path cannot be empty".to_string());
        }

        if self.database.is_empty() {
            return Err("database cannot be empty".to_string());
        }

        if !is_valid_identifier(&self.database) {
            return Err(format!(
                "database '{}' may only contain lowercase letters, digits, '-' and \
                 single inner '_'",
                self.database
            ));
        }

        if let Some(0) = self.transaction_timeout_ms {
            return Err("transaction_timeout_ms must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Names that end up inside quoted SQL identifiers
///
/// Tables are named `"<database>__<collection>"` and SQLite compares table
/// names case-insensitively, so names are lowercase only and may not contain
/// `__` or start or end with `_`. That keeps the split at the separator unique.
pub(crate) fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('_')
        && !name.ends_with('_')
        && !name.contains("__")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
