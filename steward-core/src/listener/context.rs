//! The view of the session subsystem handed to callbacks
//!
//! Observers, command handlers, and deferred tasks all run inside an apply
//! step and reach the subsystem only through a [`SessionContext`]. The
//! context allows reads, publishing, keep-alives, unregistration, and
//! deferred scheduling. Any other lifecycle mutation is a programming error
//! and is rejected with `IllegalStateAccess`.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, warn};

use crate::Index;
use crate::error::SessionError;
use crate::events::EventPublisher;
use crate::executor::Task;
use crate::session::{Metadata, Session, SessionHandle, SessionId, SessionRegistry};

/// Session mutations a callback may ask for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    KeepAlive(SessionId),
    Unregister(SessionId),
    Register(SessionId, Metadata),
    Activate(SessionId),
    Expire(SessionId),
    Close(SessionId),
}

/// Side effects a callback leaves for the apply pipeline to finish
#[derive(Default)]
pub(crate) struct StepEffects {
    /// Unregisters requested by callbacks, applied once the current
    /// dispatch returns
    pub(crate) unregisters: VecDeque<SessionId>,
    /// First rejected state access
    pub(crate) violation: Option<SessionError>,
    /// Tasks handed to the executor only if the entry commits
    pub(crate) tasks: Vec<(Index, Task)>,
}

impl std::fmt::Debug for StepEffects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEffects")
            .field("unregisters", &self.unregisters)
            .field("violation", &self.violation)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

/// Access to the session subsystem from inside an apply step
pub struct SessionContext<'a> {
    index: Index,
    registry: &'a mut SessionRegistry,
    publisher: &'a mut EventPublisher,
    effects: &'a mut StepEffects,
}

impl<'a> SessionContext<'a> {
    pub(crate) fn new(
        index: Index,
        registry: &'a mut SessionRegistry,
        publisher: &'a mut EventPublisher,
        effects: &'a mut StepEffects,
    ) -> Self {
        Self {
            index,
            registry,
            publisher,
            effects,
        }
    }

    /// Index of the entry being applied
    pub fn index(&self) -> Index {
        self.index
    }

    pub fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.registry.lookup(id)
    }

    /// All session records in identifier order
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.registry.sessions()
    }

    /// Queue an event message for `session`
    ///
    /// Silently dropped unless the session is `Open`. Queued messages go
    /// out on the next apply step, not this one.
    pub fn publish(&mut self, session: SessionId, event: impl Into<String>, payload: Value) -> bool {
        self.publisher
            .enqueue(&mut *self.registry, session, event, payload)
    }

    /// Refresh a session's expiration tracking
    pub fn keep_alive(&mut self, session: SessionId) -> Result<(), SessionError> {
        self.registry.keep_alive(session, self.index)
    }

    /// Ask for a client-style close of `session`
    ///
    /// The close runs after the current callback sequence finishes, within
    /// the same apply step.
    pub fn unregister(&mut self, session: SessionId) -> Result<(), SessionError> {
        self.registry.unregister(session)?;
        if !self.effects.unregisters.contains(&session) {
            self.effects.unregisters.push_back(session);
        }
        Ok(())
    }

    /// Route a lifecycle request
    ///
    /// Only keep-alive and unregister are available to callbacks.
    pub fn request(&mut self, request: SessionRequest) -> Result<(), SessionError> {
        match request {
            SessionRequest::KeepAlive(session) => self.keep_alive(session),
            SessionRequest::Unregister(session) => self.unregister(session),
            other => {
                let error = SessionError::IllegalStateAccess(format!(
                    "{other:?} is not permitted from a callback"
                ));
                warn!(index = self.index, error = %error, "rejected session state access");
                if self.effects.violation.is_none() {
                    self.effects.violation = Some(error.clone());
                }
                Err(error)
            }
        }
    }

    /// Run `task` at the start of the next apply step
    pub fn execute(&mut self, task: impl FnOnce(&mut SessionContext<'_>) + Send + 'static) {
        self.schedule_at(self.index.saturating_add(1), task);
    }

    /// Run `task` at the start of the first apply step at or after `index`
    ///
    /// An index at or before the current one means the next step.
    pub fn schedule_at(
        &mut self,
        index: Index,
        task: impl FnOnce(&mut SessionContext<'_>) + Send + 'static,
    ) {
        let due = index.max(self.index.saturating_add(1));
        debug!(index = self.index, due, "task scheduled");
        let task: Task = Box::new(task);
        self.effects.tasks.push((due, task));
    }
}
