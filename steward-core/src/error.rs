//! Error types for steward-core

use thiserror::Error;

use crate::session::{SessionId, SessionState, Transition};
use crate::Index;

/// Top-level error type for steward-core
#[derive(Error, Debug)]
pub enum StewardError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Errors scoped to a single committed entry
///
/// The offending entry has no effect on session state. Later entries keep
/// applying normally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session already registered: {0}")]
    DuplicateSession(SessionId),

    #[error("Session not found: {0}")]
    UnknownSession(SessionId),

    #[error("Invalid state transition {transition:?} for session {session} in state {from}")]
    IllegalTransition {
        session: SessionId,
        from: SessionState,
        transition: Transition,
    },

    #[error("Illegal session state access: {0}")]
    IllegalStateAccess(String),
}

/// Errors from the apply pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The log collaborator delivered an entry at or below the last applied index.
    #[error("Entry {index} applied out of order (last applied {last_applied})")]
    OutOfOrder { index: Index, last_applied: Index },

    /// A previous ordering violation stopped the state machine.
    #[error("State machine halted after applying index {last_applied}")]
    Halted { last_applied: Index },
}

impl ApplyError {
    /// Whether this error stops the whole state machine
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfOrder { .. } | Self::Halted { .. })
    }
}

/// Errors loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors encoding or restoring a snapshot
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Snapshot is inconsistent: {0}")]
    Inconsistent(String),
}

/// Result alias for steward-core operations
pub type StewardResult<T> = Result<T, StewardError>;
