//! Configuration types.
//!
//! Defaults match what list screens use when nothing is configured. A TOML
//! file at `<config_dir>/vitrine/config.toml` overrides them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trailing debounce applied to free-text search.
    pub debounce_ms: u64,

    /// How long a cached response is served without refetching.
    pub stale_time_ms: u64,

    /// Allowed page sizes.
    pub page_sizes: Vec<usize>,

    /// Page size used when a view does not pick one.
    pub default_page_size: usize,

    /// Transport timeout per request attempt.
    pub request_timeout_ms: u64,

    /// Bounded retries for transient server errors.
    pub max_retries: u32,

    /// HTTP statuses treated as transient.
    pub retry_statuses: Vec<u16>,

    /// Linear backoff step between retries.
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            stale_time_ms: 30_000,
            page_sizes: vec![10, 20, 50, 100],
            default_page_size: 10,
            request_timeout_ms: 15_000,
            max_retries: 2,
            retry_statuses: vec![502, 503, 504],
            retry_backoff_ms: 250,
        }
    }
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&source)
    }

    /// Load from the default location, falling back to defaults if absent.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_sizes.is_empty() || self.page_sizes.contains(&0) {
            return Err(ConfigError::Invalid(
                "page_sizes must be non-empty and positive".to_string(),
            ));
        }
        if !self.page_sizes.contains(&self.default_page_size) {
            return Err(ConfigError::Invalid(format!(
                "default_page_size {} is not one of {:?}",
                self.default_page_size, self.page_sizes
            )));
        }
        Ok(())
    }
}

/// Get the config directory path.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("vitrine"))
}

/// Get the path to config.toml.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("config.toml"))
}
