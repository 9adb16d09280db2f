//! Plugin configuration
//!
//! ```toml
//! watch_interval_ms = 1000
//!
//! [usage]
//! when_in_use = "Shows stores near you."
//!
//! [default_options]
//! enableHighAccuracy = true
//! timeout = 10000
//! ```

use gloc_core::{FixRequest, LocationOptions, UsageDescriptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for one plugin session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Permission prompt texts shipped with the host application
    pub usage: UsageDescriptions,
    /// Meters between watch updates with `enableHighAccuracy`
    pub high_accuracy_distance_m: f64,
    /// Meters between watch updates otherwise
    pub low_accuracy_distance_m: f64,
    pub watch_interval_ms: u64,
    /// Used when a call arrives without options
    pub default_options: LocationOptions,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            usage: UsageDescriptions::default(),
            high_accuracy_distance_m: 5.0,
            low_accuracy_distance_m: 10.0,
            watch_interval_ms: 1000,
            default_options: LocationOptions::default(),
        }
    }
}

impl PluginConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn with_usage(mut self, usage: UsageDescriptions) -> Self {
        self.usage = usage;
        self
    }

    pub fn minimum_update_distance(&self, high_accuracy: bool) -> f64 {
        if high_accuracy {
            self.high_accuracy_distance_m
        } else {
            self.low_accuracy_distance_m
        }
    }

    /// Back-end parameters for a single fix
    pub fn fix_request(&self, options: &LocationOptions) -> FixRequest {
        FixRequest::from_options(
            options,
            self.minimum_update_distance(options.enable_high_accuracy),
            Duration::ZERO,
        )
    }

    /// Back-end parameters for continuous updates
    pub fn watch_request(&self, options: &LocationOptions) -> FixRequest {
        FixRequest::from_options(
            options,
            self.minimum_update_distance(options.enable_high_accuracy),
            Duration::from_millis(self.watch_interval_ms),
        )
    }
}
