//! Configuration for the sync daemon

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

/// Default delay between the end of one pass and the start of the next
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;

/// Default interval between heartbeat probes
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default per-query batch size
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default source table holding media records
pub const DEFAULT_TABLE: &str = "media_files";

/// MySQL connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    /// Server hostname
    pub host: String,

    /// Server port
    pub port: u16,

    /// Username
    pub user: String,

    /// Password (may be empty)
    pub password: String,

    /// Database name
    pub database: String,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: "asterisk".to_string(),
        }
    }
}

/// Configuration for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory kept in sync with the media table
    pub media_path: PathBuf,

    /// MySQL connection parameters
    pub mysql: MysqlConfig,

    /// Table holding the media records
    pub table: String,

    /// Seconds between the end of one pass and the start of the next
    pub update_interval_secs: u64,

    /// Seconds between heartbeat probes, independent of the pass cadence
    pub heartbeat_interval_secs: u64,

    /// Maximum records fetched per query
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            media_path: PathBuf::from("media"),
            mysql: MysqlConfig::default(),
            table: DEFAULT_TABLE.to_string(),
            update_interval_secs: DEFAULT_UPDATE_INTERVAL_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl SyncConfig {
    /// Create a config builder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::config_error(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| SyncError::config_error(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Apply connection overrides from the process environment.
    ///
    /// Environment variables win over both the config file and CLI flags.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MYSQL_HOST") {
            self.mysql.host = host;
        }
        if let Some(user) = lookup("MYSQL_USER") {
            self.mysql.user = user;
        }
        if let Some(password) = lookup("MYSQL_PASSWORD") {
            self.mysql.password = password;
        }
        if let Some(database) = lookup("MYSQL_DB") {
            self.mysql.database = database;
        }
    }

    /// Validate the configuration before the daemon starts
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.media_path.as_os_str().is_empty() {
            return Err(SyncError::config_error("media_path must not be empty"));
        }
        // The table name is interpolated into SQL, so it is restricted
        // to identifier characters.
        if self.table.is_empty()
            || !self.table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(SyncError::config_error(format!(
                "invalid table name {:?}",
                self.table
            )));
        }
        if self.update_interval_secs == 0 {
            return Err(SyncError::config_error("update_interval_secs must be > 0"));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(SyncError::config_error("heartbeat_interval_secs must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(SyncError::config_error("batch_size must be > 0"));
        }
        Ok(())
    }

    /// Delay between passes
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Interval between heartbeat probes
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the media directory
    pub fn media_path(mut self, path: PathBuf) -> Self {
        self.config.media_path = path;
        self
    }

    /// Set the MySQL connection parameters
    pub fn mysql(mut self, mysql: MysqlConfig) -> Self {
        self.config.mysql = mysql;
        self
    }

    /// Set the source table
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.config.table = table.into();
        self
    }

    /// Set the delay between passes
    pub fn update_interval_secs(mut self, secs: u64) -> Self {
        self.config.update_interval_secs = secs;
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.config.heartbeat_interval_secs = secs;
        self
    }

    /// Set the per-query batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Build the config
    pub fn build(self) -> SyncConfig {
        self.config
    }
}
