//! Session states and the lifecycle transition table
//!
//! Every legal transition maps to a fixed list of steps. Each step names the
//! state the session enters and the lifecycle callback that fires while the
//! session is in that state. Callers validate the whole plan before mutating
//! anything, so a rejected transition never leaves a partial update behind.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Unique, monotonically assigned session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// State of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered but not yet acknowledged open to the client
    Pending,
    /// Fully usable; the only state that receives event messages
    Open,
    /// Client-initiated close in progress
    Unregistering,
    /// Server-initiated timeout in progress
    Expiring,
    /// Terminal
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Open => "open",
            Self::Unregistering => "unregistering",
            Self::Expiring => "expiring",
            Self::Closed => "closed",
        }
    }

    /// Whether the session still accepts keep-alives and commands
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle operations that move a session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// A new session enters the registry
    Register,
    /// Registration acknowledged; no callbacks fire
    Activate,
    /// Client-initiated close
    Unregister,
    /// Server-initiated timeout
    Expire,
}

/// The four lifecycle callbacks observers can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Callback {
    Register,
    Unregister,
    Expire,
    Close,
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Register => "register",
            Self::Unregister => "unregister",
            Self::Expire => "expire",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

/// One step of a transition: enter `state`, then fire `callback` if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub state: SessionState,
    pub callback: Option<Callback>,
}

const REGISTER: &[Step] = &[Step {
    state: SessionState::Pending,
    callback: Some(Callback::Register),
}];

const ACTIVATE: &[Step] = &[Step {
    state: SessionState::Open,
    callback: None,
}];

const UNREGISTER: &[Step] = &[
    Step {
        state: SessionState::Unregistering,
        callback: Some(Callback::Unregister),
    },
    Step {
        state: SessionState::Closed,
        callback: Some(Callback::Close),
    },
];

const EXPIRE: &[Step] = &[
    Step {
        state: SessionState::Expiring,
        callback: Some(Callback::Expire),
    },
    Step {
        state: SessionState::Closed,
        callback: Some(Callback::Close),
    },
];

/// Transition table for a single session
///
/// Stateless: the current state lives in the session record, and the table
/// only answers which steps a transition takes from a given state.
pub struct SessionStateMachine;

impl SessionStateMachine {
    /// Steps for registering a session that does not exist yet
    pub fn register() -> &'static [Step] {
        REGISTER
    }

    /// Steps for `transition` from `from`, or `IllegalTransition`
    pub fn plan(
        session: SessionId,
        from: SessionState,
        transition: Transition,
    ) -> Result<&'static [Step], SessionError> {
        use SessionState::*;

        match (from, transition) {
            (Pending, Transition::Activate) => Ok(ACTIVATE),
            (Pending | Open, Transition::Unregister) => Ok(UNREGISTER),
            (Pending | Open, Transition::Expire) => Ok(EXPIRE),
            _ => Err(SessionError::IllegalTransition {
                session,
                from,
                transition,
            }),
        }
    }

    /// Callbacks fired by a plan, in order
    pub fn callbacks(steps: &[Step]) -> Vec<Callback> {
        steps.iter().filter_map(|step| step.callback).collect()
    }
}
