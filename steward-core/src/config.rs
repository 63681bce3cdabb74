//! Configuration for the session subsystem
//!
//! Every replica must run with the same values: they change which entries
//! expire sessions, so a mismatch breaks replay determinism.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of indexes a session may go without a keep-alive
pub const DEFAULT_SESSION_TIMEOUT: u64 = 1_000;

/// Default number of indexes a closed record is retained before reclaim
pub const DEFAULT_CLOSED_RETENTION: u64 = 100;

/// Session subsystem configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Indexes between the last keep-alive and expiration
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,

    /// Indexes a closed session's record is kept for duplicate detection
    #[serde(default = "default_closed_retention")]
    pub closed_retention: u64,

    /// Also run expiration after every entry, not just on ticks
    #[serde(default)]
    pub check_expiration_on_apply: bool,
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT
}

fn default_closed_retention() -> u64 {
    DEFAULT_CLOSED_RETENTION
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            closed_retention: DEFAULT_CLOSED_RETENTION,
            check_expiration_on_apply: false,
        }
    }
}

impl SessionConfig {
    /// Config with the given timeout and defaults elsewhere
    pub fn with_timeout(session_timeout: u64) -> Self {
        Self {
            session_timeout,
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_timeout == 0 {
            return Err(ConfigError::Invalid(
                "session_timeout must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
