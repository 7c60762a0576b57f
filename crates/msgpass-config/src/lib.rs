#![deny(unsafe_code)]

//! Configuration loading and validation for msgpass.
//!
//! Loads TOML configuration files shared by the server and client binaries.
//! Provides the [`AppConfig`] type as the central configuration structure.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Well-known name the server registers its channel under.
pub const DEFAULT_SERVICE_NAME: &str = "msgpass_server";

/// Default directory holding channel sockets and the name registry.
pub const DEFAULT_RUNTIME_DIR: &str = "/tmp/msgpass";

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where channels and registry entries live.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Service discovery.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Client-side exchange behaviour.
    #[serde(default)]
    pub connector: ConnectorConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transport substrate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Directory for channel sockets (`chan-<pid>-<chid>.sock`) and the
    /// `names/` registry.
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            runtime_dir: default_runtime_dir(),
        }
    }
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RUNTIME_DIR)
}

/// Service name configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Name the server registers and name-mode clients resolve.
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

/// Client exchange configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Upper bound on a single send/reply round trip in seconds.
    /// `0` waits indefinitely.
    #[serde(default)]
    pub exchange_timeout_secs: u64,

    /// Prompt written before each line of input.
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_secs: 0,
            prompt: default_prompt(),
        }
    }
}

impl ConnectorConfig {
    /// The exchange timeout, or `None` when exchanges wait indefinitely.
    pub fn exchange_timeout(&self) -> Option<Duration> {
        (self.exchange_timeout_secs > 0).then(|| Duration::from_secs(self.exchange_timeout_secs))
    }
}

fn default_prompt() -> String {
    "Enter message (or 'shutdown' to stop server): ".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Whether `name` can be used as a registry entry.
///
/// Names become file names under the registry directory, so path separators,
/// NUL and the dot entries are rejected.
pub fn is_valid_service_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.runtime_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "transport.runtime_dir must not be empty".to_string(),
            ));
        }
        if !is_valid_service_name(&self.service.name) {
            return Err(ConfigError::Validation(format!(
                "service.name must be a non-empty name without '/' or NUL, got {:?}",
                self.service.name
            )));
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                VALID_LOG_LEVELS, self.logging.level
            )));
        }
        Ok(())
    }
}
