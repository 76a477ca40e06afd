//! Engine configuration.
//!
//! Configuration is passed explicitly to the components that need it and
//! can be loaded from TOML:
//!
//! ```toml
//! [archival]
//! level = 9
//! days_inactive = 7
//!
//! [locks]
//! wait_ms = 2000
//! ```
//!
//! Every field has a default, so an empty document is a valid configuration.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Archival and compression settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivalConfig {
    pub enabled: bool,
    /// Compression level, 0 (none) to 9 (best).
    pub level: u32,
    /// Serialized chains smaller than this are stored uncompressed.
    pub threshold_bytes: usize,
    /// A root becomes eligible after this many days without events.
    pub days_inactive: u32,
    /// Minimum time between a restore and the next archival of the same root.
    pub restore_cooldown_hours: u32,
    /// Maximum number of roots archived per sweep.
    pub dispatch_limit: usize,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 6,
            threshold_bytes: 1000,
            days_inactive: 30,
            restore_cooldown_hours: 24,
            dispatch_limit: 50,
        }
    }
}

impl ArchivalConfig {
    pub fn inactivity(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.days_inactive))
    }

    pub fn restore_cooldown(&self) -> ChronoDuration {
        ChronoDuration::hours(i64::from(self.restore_cooldown_hours))
    }
}

/// Per-root lock timings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub wait_ms: u64,
    pub hold_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_ms: 5_000,
            hold_ms: 60_000,
        }
    }
}

impl LockConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

/// Complete engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub archival: ArchivalConfig,
    pub locks: LockConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigLoadError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigLoadError> {
        toml::to_string_pretty(self).map_err(|e| ConfigLoadError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.archival.level > 9 {
            return Err(ConfigLoadError::Invalid(format!(
                "archival.level must be between 0 and 9, got {}",
                self.archival.level
            )));
        }
        if self.archival.dispatch_limit == 0 {
            return Err(ConfigLoadError::Invalid(
                "archival.dispatch_limit must be greater than zero".to_string(),
            ));
        }
        if self.locks.hold_ms == 0 {
            return Err(ConfigLoadError::Invalid(
                "locks.hold_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
