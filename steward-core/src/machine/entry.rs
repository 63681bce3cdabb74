//! Committed entries and their apply results

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Index;
use crate::session::{Metadata, SessionHandle, SessionId};

/// A committed log entry as seen by the session subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    /// A client opens a new session
    RegisterSession {
        session: SessionId,
        #[serde(default)]
        metadata: Metadata,
    },

    /// A client signals it is still alive
    KeepAlive { session: SessionId },

    /// A client closes its session
    UnregisterSession { session: SessionId },

    /// An ordinary state machine operation submitted through a session
    Command {
        session: SessionId,
        #[serde(default)]
        payload: Value,
    },

    /// Periodic marker that drives expiration
    Tick,
}

impl Entry {
    /// Session the entry is addressed to, if any
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Entry::RegisterSession { session, .. }
            | Entry::KeepAlive { session }
            | Entry::UnregisterSession { session }
            | Entry::Command { session, .. } => Some(*session),
            Entry::Tick => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Entry::RegisterSession { .. } => "register_session",
            Entry::KeepAlive { .. } => "keep_alive",
            Entry::UnregisterSession { .. } => "unregister_session",
            Entry::Command { .. } => "command",
            Entry::Tick => "tick",
        }
    }
}

/// An entry paired with its log index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Committed {
    pub index: Index,
    #[serde(flatten)]
    pub entry: Entry,
}

impl Committed {
    pub fn new(index: Index, entry: Entry) -> Self {
        Self { index, entry }
    }
}

/// Successful result of applying one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApplyOutput {
    /// The session as it stood once registration finished
    Registered { session: SessionHandle },
    KeptAlive { session: SessionId },
    Unregistered { session: SessionId },
    /// Whatever the command handler returned
    Command { result: Value },
    /// Sessions expired and closed records reclaimed by a tick
    Tick {
        expired: Vec<SessionId>,
        reclaimed: Vec<SessionId>,
    },
}
