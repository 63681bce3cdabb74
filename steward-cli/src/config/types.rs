use serde::{Deserialize, Serialize};
use steward_core::SessionConfig;
use steward_core::config::{DEFAULT_CLOSED_RETENTION, DEFAULT_SESSION_TIMEOUT};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStewardConfig {
    #[serde(default)]
    pub session: RawSessionConfig,

    #[serde(default)]
    pub replay: RawReplayConfig,
}

/// Session subsystem settings as stored in TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSessionConfig {
    pub session_timeout: Option<u64>,
    pub closed_retention: Option<u64>,
    pub check_expiration_on_apply: Option<bool>,
}

/// Replay harness settings as stored in TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawReplayConfig {
    /// Stop at the first rejected entry
    pub stop_on_error: Option<bool>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StewardConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ReplayConfig {
    #[serde(default)]
    pub stop_on_error: bool,
}

impl RawSessionConfig {
    pub fn finalize(self) -> SessionConfig {
        SessionConfig {
            session_timeout: self.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT),
            closed_retention: self.closed_retention.unwrap_or(DEFAULT_CLOSED_RETENTION),
            check_expiration_on_apply: self.check_expiration_on_apply.unwrap_or(false),
        }
    }
}
