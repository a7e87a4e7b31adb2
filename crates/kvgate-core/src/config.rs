//! kvgate.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{BackendAuth, FsyncPolicy, Verbosity};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub backend: BackendConfig,
    pub workers: WorkersConfig,
    pub log: LogConfig,
}

/// Connection parameters shared read-only by every pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    /// Database index selected on every new connection.
    pub database: u32,
    pub auth: Option<BackendAuth>,
    /// TCP keep-alive interval in seconds, 0 disables it.
    pub keep_alive_sec: u64,
    pub connect_timeout_ms: u64,
    /// Delay before a failed or dropped connection is re-attempted.
    pub reconnect_delay_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            auth: None,
            keep_alive_sec: 15,
            connect_timeout_ms: 5000,
            reconnect_delay_ms: 100,
        }
    }
}

impl BackendConfig {
    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_sec > 0).then(|| Duration::from_secs(self.keep_alive_sec))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub threads: usize,
    /// One pool per worker thread, this many slots each.
    pub pool_size_per_thread: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            pool_size_per_thread: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Destination file; stderr when absent or unopenable.
    pub file: Option<PathBuf>,
    pub verbosity: Verbosity,
    pub fsync: FsyncPolicy,
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.host.is_empty() {
            return Err(ConfigError::Invalid("backend.host must not be empty".into()));
        }
        if self.backend.port == 0 {
            return Err(ConfigError::Invalid("backend.port must be non-zero".into()));
        }
        if self.backend.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "backend.connect_timeout_ms must be non-zero".into(),
            ));
        }
        if self.backend.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "backend.reconnect_delay_ms must be non-zero".into(),
            ));
        }
        if self.workers.threads == 0 {
            return Err(ConfigError::Invalid("workers.threads must be at least 1".into()));
        }
        if self.workers.pool_size_per_thread == 0 {
            return Err(ConfigError::Invalid(
                "workers.pool_size_per_thread must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
