//! Token-extension tuning
//!
//! Defaults match the provider contract: a successfully refreshed token is
//! left alone for a day, and a failed attempt is not retried for an hour.
//! Both windows can be overridden from a TOML file for embedders that need
//! different cadences.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Scheduling windows for background token extension.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Minimum age of the token (since its last refresh) before an
    /// extension is attempted, in seconds
    #[serde(default = "default_extend_threshold_secs")]
    pub extend_threshold_secs: u64,
    /// Minimum gap between extension attempts, in seconds
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

fn default_extend_threshold_secs() -> u64 {
    24 * 60 * 60
}

fn default_retry_interval_secs() -> u64 {
    60 * 60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            extend_threshold_secs: default_extend_threshold_secs(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string and validate it.
    pub fn from_toml_str(contents: &str) -> common::Result<Self> {
        let config: SessionConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.extend_threshold_secs == 0 {
            return Err(common::Error::Config(
                "extend_threshold_secs must be greater than 0".into(),
            ));
        }
        if self.retry_interval_secs == 0 {
            return Err(common::Error::Config(
                "retry_interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn extend_threshold(&self) -> Duration {
        Duration::from_secs(self.extend_threshold_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub(crate) fn extend_threshold_millis(&self) -> u64 {
        self.extend_threshold_secs * 1000
    }

    pub(crate) fn retry_interval_millis(&self) -> u64 {
        self.retry_interval_secs * 1000
    }
}
