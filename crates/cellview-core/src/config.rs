//! Cache subsystem configuration.
//!
//! Parsed from TOML. All fields have defaults, so an empty document is a
//! valid configuration; parsing is followed by validation so an out-of-range
//! value fails at load time rather than at the first revalidation pass.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delivery strategy selection for classified operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// One message per operation, sent in classification order.
    #[default]
    Immediate,
    /// All operations of a tick batched into a single ordered message.
    Aggregate,
}

/// Configuration for per-viewer cache revalidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Delay before a new session's first revalidation pass, milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Fixed period between revalidation passes, milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Radius of the viewer-centered proximity sphere, world units.
    #[serde(default = "default_proximity_radius")]
    pub proximity_radius: f32,

    /// Delivery strategy for classified operations.
    #[serde(default)]
    pub delivery: DeliveryMode,
}

const fn default_initial_delay_ms() -> u64 {
    1_000
}

const fn default_tick_interval_ms() -> u64 {
    2_000
}

const fn default_proximity_radius() -> f32 {
    100.0
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            proximity_radius: default_proximity_radius(),
            delivery: DeliveryMode::default(),
        }
    }
}

impl CacheConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` for a zero tick interval or a
    /// non-positive or non-finite proximity radius.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "tick_interval_ms must be nonzero".to_string(),
            ));
        }
        if !self.proximity_radius.is_finite() || self.proximity_radius <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "proximity_radius must be positive and finite, got {}",
                self.proximity_radius
            )));
        }
        Ok(())
    }

    /// The initial delay as a [`Duration`].
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// The tick period as a [`Duration`].
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the TOML document.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value was out of range.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
