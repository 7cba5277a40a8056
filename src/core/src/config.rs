use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ImportError, Result};

/// Environment variable that disables TLS verification for remote archives.
pub const INSECURE_ENV: &str = "OVA_IMPORT_INSECURE";

/// Top-level import configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Deployment protocol settings
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Remote archive transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

impl ImportConfig {
    /// Load a configuration file. `.json` files are parsed as JSON,
    /// everything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ImportError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Ok(config)
    }

    /// Apply environment overrides on top of the loaded values.
    pub fn with_env(mut self) -> Self {
        if let Ok(value) = std::env::var(INSECURE_ENV) {
            self.transport.insecure = matches!(value.as_str(), "1" | "true" | "yes");
        }
        self
    }
}

/// Deployment protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Upper bound for a whole staged import, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How often lease progress is reported, in milliseconds
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Locale passed with the import spec
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_timeout_secs() -> u64 {
    3600 // 1 hour
}

fn default_progress_interval_ms() -> u64 {
    2000
}

fn default_locale() -> String {
    "US".to_string()
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            locale: default_locale(),
        }
    }
}

impl DeployConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

/// Remote archive transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Accept invalid TLS certificates
    #[serde(default)]
    pub insecure: bool,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            insecure: false,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
