//! Lifecycle tunables
//!
//! Read from the `config_entries:` section of `configuration.yaml`:
//!
//! ```yaml
//! config_entries:
//!   setup_timeout: 60
//!   unload_timeout: 30
//!   retry:
//!     base_interval: 5
//!     max_interval: 80
//! ```
//!
//! A missing file or section yields the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::retry::{seconds, RetryPolicy};

/// Name of the main configuration file inside the config directory
pub const CONFIG_FILE: &str = "configuration.yaml";

/// Key of the section this crate reads
pub const CONFIG_SECTION: &str = "config_entries";

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Configuration for the config entries manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigEntriesConfig {
    /// Backoff for entries in `SetupRetry`
    pub retry: RetryPolicy,
    /// Seconds an integration's `setup_entry` may take
    pub setup_timeout: f64,
    /// Seconds an integration's `unload_entry` may take
    pub unload_timeout: f64,
    /// Seconds a single platform setup or unload may take
    pub platform_timeout: f64,
    /// Buffered change notifications per subscriber
    pub event_capacity: usize,
}

impl Default for ConfigEntriesConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            setup_timeout: 60.0,
            unload_timeout: 30.0,
            platform_timeout: 60.0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ConfigEntriesConfig {
    /// Load from `<config_dir>/configuration.yaml`
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = config_dir.as_ref().join(CONFIG_FILE);
        if !path.exists() {
            debug!("No {:?}, using default config entries settings", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        Self::from_yaml_str(&content, &path)
    }

    /// Parse the `config_entries` section out of a full configuration document
    pub fn from_yaml_str(content: &str, source_path: &Path) -> ConfigResult<Self> {
        let parse_error = |e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        };

        let document: serde_yaml::Value = serde_yaml::from_str(content).map_err(parse_error)?;
        let config = match document.get(CONFIG_SECTION) {
            Some(section) if !section.is_null() => {
                serde_yaml::from_value(section.clone()).map_err(parse_error)?
            }
            _ => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("setup_timeout", self.setup_timeout),
            ("unload_timeout", self.unload_timeout),
            ("platform_timeout", self.platform_timeout),
            ("retry.base_interval", self.retry.base_interval),
        ];
        for (key, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(key, format!("must be a positive number, got {}", value)));
            }
        }

        if !self.retry.max_interval.is_finite() || self.retry.max_interval < self.retry.base_interval
        {
            return Err(invalid(
                "retry.max_interval",
                format!(
                    "must be at least retry.base_interval ({}), got {}",
                    self.retry.base_interval, self.retry.max_interval
                ),
            ));
        }
        if !self.retry.jitter.is_finite() || self.retry.jitter < 0.0 {
            return Err(invalid("retry.jitter", "must not be negative".to_string()));
        }
        let durations = [
            ("setup_timeout", self.setup_timeout),
            ("unload_timeout", self.unload_timeout),
            ("platform_timeout", self.platform_timeout),
            ("retry.base_interval", self.retry.base_interval),
            ("retry.max_interval", self.retry.max_interval),
            ("retry.max_interval + retry.jitter", self.retry.max_interval + self.retry.jitter),
        ];
        for (key, value) in durations {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(invalid(key, format!("{} seconds is out of range", value)));
            }
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be at least 1".to_string()));
        }

        Ok(())
    }

    pub fn setup_timeout(&self) -> Duration {
        seconds(self.setup_timeout)
    }

    pub fn unload_timeout(&self) -> Duration {
        seconds(self.unload_timeout)
    }

    pub fn platform_timeout(&self) -> Duration {
        seconds(self.platform_timeout)
    }
}

fn invalid(key: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason,
    }
}
