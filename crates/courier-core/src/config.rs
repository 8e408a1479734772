//! Queue configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;

/// Environment variables that override the file configuration.
pub const HOST_ENV: &str = "REDIS_HOST";
pub const PORT_ENV: &str = "REDIS_PORT";

/// Connection descriptor for the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self::new(default_host())
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Store connection.
    #[serde(default)]
    pub connection: ConnectionInfo,

    /// Blocking pop timeout used by worker loops, in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    /// 0 は BLOCKING POP の「無期限に待つ」になってしまうので受け付けない
    #[error("poll_timeout_secs must be at least 1")]
    ZeroPollTimeout,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_timeout() -> u64 {
    1
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionInfo::default(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl QueueConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.poll_timeout_secs == 0 {
            return Err(ConfigError::ZeroPollTimeout);
        }
        Ok(self)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// `REDIS_HOST` / `REDIS_PORT` で上書きする
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(std::env::var(HOST_ENV).ok(), std::env::var(PORT_ENV).ok())
    }

    fn apply_overrides(
        mut self,
        host: Option<String>,
        port: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            self.connection.host = host;
        }
        if let Some(port) = port {
            self.connection.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: PORT_ENV,
                value: port,
            })?;
        }
        Ok(self)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}
