//! SessionRegistry: the authoritative map of session records
//!
//! The registry owns every session record for one state machine instance.
//! Every mutation is driven by the apply pipeline while it applies a
//! committed entry, so two replicas fed the same log hold identical
//! registries. Records are kept in a `BTreeMap` so iteration order is the
//! same on every replica.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Index;
use crate::error::{SessionError, SnapshotError};
use crate::events::EventMessage;

use super::state::{SessionId, SessionState, SessionStateMachine, Step, Transition};

/// Metadata supplied by the client at registration
pub type Metadata = BTreeMap<String, String>;

/// A session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    /// Log index of the registering entry
    created_at: Index,
    last_keep_alive: Index,
    /// Set once the session reaches `Closed`
    #[serde(default)]
    closed_at: Option<Index>,
    #[serde(default)]
    metadata: Metadata,
    /// Outbound messages not yet flushed
    #[serde(default)]
    queue: VecDeque<EventMessage>,
}

impl Session {
    fn new(id: SessionId, state: SessionState, metadata: Metadata, index: Index) -> Self {
        Self {
            id,
            state,
            created_at: index,
            last_keep_alive: index,
            closed_at: None,
            metadata,
            queue: VecDeque::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> Index {
        self.created_at
    }

    pub fn last_keep_alive(&self) -> Index {
        self.last_keep_alive
    }

    pub fn closed_at(&self) -> Option<Index> {
        self.closed_at
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Messages waiting for the next flush, oldest first
    pub fn queue(&self) -> &VecDeque<EventMessage> {
        &self.queue
    }

    pub(crate) fn queue_mut(&mut self) -> &mut VecDeque<EventMessage> {
        &mut self.queue
    }

    /// Owned read-only view handed to observers
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            state: self.state,
            created_at: self.created_at,
            last_keep_alive: self.last_keep_alive,
            metadata: self.metadata.clone(),
        }
    }
}

/// Read-only snapshot of a session record
///
/// Observers and command handlers receive handles rather than references so
/// they never hold a borrow of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: SessionId,
    pub state: SessionState,
    pub created_at: Index,
    pub last_keep_alive: Index,
    pub metadata: Metadata,
}

/// Per-state session counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub pending: usize,
    pub open: usize,
    pub unregistering: usize,
    pub expiring: usize,
    pub closed: usize,
    /// Messages queued across all sessions
    pub queued_messages: usize,
}

/// Serialized registry contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub high_water: Option<SessionId>,
    pub sessions: Vec<Session>,
}

/// Prior contents of every record touched since the journal opened
#[derive(Debug, Clone, Default, PartialEq)]
struct Journal {
    high_water: Option<SessionId>,
    records: BTreeMap<SessionId, Option<Session>>,
}

/// Authoritative map of session identifier to session record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    /// Highest identifier ever registered; survives reclamation
    high_water: Option<SessionId>,
    /// Open while an entry is being applied
    journal: Option<Journal>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` was ever assigned
    ///
    /// Identifiers are assigned in increasing order, so anything at or below
    /// the high-water mark counts as known even after its record is gone.
    pub fn is_known(&self, id: SessionId) -> bool {
        self.high_water.is_some_and(|high| id <= high)
    }

    /// Register a new session in `Pending`
    pub fn register(
        &mut self,
        id: SessionId,
        metadata: Metadata,
        index: Index,
    ) -> Result<SessionHandle, SessionError> {
        if self.is_known(id) {
            return Err(SessionError::DuplicateSession(id));
        }

        let state = SessionStateMachine::register()
            .last()
            .map(|step| step.state)
            .unwrap_or(SessionState::Pending);
        let session = Session::new(id, state, metadata, index);
        let handle = session.handle();
        self.touch(id);
        self.sessions.insert(id, session);
        self.high_water = Some(id);
        Ok(handle)
    }

    /// Refresh the session's expiration tracking
    ///
    /// Fails with `UnknownSession` when the session is absent or no longer
    /// live.
    pub fn keep_alive(&mut self, id: SessionId, index: Index) -> Result<(), SessionError> {
        if !self.sessions.get(&id).is_some_and(|s| s.state.is_live()) {
            return Err(SessionError::UnknownSession(id));
        }
        let Some(session) = self.get_mut(id) else {
            return Err(SessionError::UnknownSession(id));
        };
        session.last_keep_alive = session.last_keep_alive.max(index);
        Ok(())
    }

    /// Begin a client-initiated close
    ///
    /// Returns the steps to walk; nothing changes until the caller enters
    /// them with [`SessionRegistry::enter`].
    pub fn unregister(&self, id: SessionId) -> Result<&'static [Step], SessionError> {
        self.plan(id, Transition::Unregister)
    }

    /// Validate `transition` for `id` without changing anything
    pub fn plan(
        &self,
        id: SessionId,
        transition: Transition,
    ) -> Result<&'static [Step], SessionError> {
        let session = self
            .sessions
            .get(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        SessionStateMachine::plan(id, session.state, transition)
    }

    /// Move a session into `state` as part of a validated plan
    ///
    /// Leaving `Open` discards the outbound queue. Returns the number of
    /// discarded messages.
    pub(crate) fn enter(&mut self, id: SessionId, state: SessionState, index: Index) -> usize {
        let Some(session) = self.get_mut(id) else {
            return 0;
        };

        let previous = session.state;
        session.state = state;
        if state.is_closed() {
            session.closed_at = Some(index);
        }

        let mut dropped = 0;
        if previous == SessionState::Open && state != SessionState::Open {
            dropped = session.queue.len();
            session.queue.clear();
        }

        debug!(session = %id, from = %previous, to = %state, index, "session transition");
        dropped
    }

    pub fn lookup(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.get(&id).map(Session::handle)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Mutable access; the record is journaled first
    pub(crate) fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        if !self.sessions.contains_key(&id) {
            return None;
        }
        self.touch(id);
        self.sessions.get_mut(&id)
    }

    /// Start recording prior record contents so the current entry can be
    /// undone
    pub(crate) fn begin(&mut self) {
        self.journal = Some(Journal {
            high_water: self.high_water,
            records: BTreeMap::new(),
        });
    }

    /// Keep everything changed since [`SessionRegistry::begin`]
    pub(crate) fn commit(&mut self) {
        self.journal = None;
    }

    /// Put every record touched since [`SessionRegistry::begin`] back the way
    /// it was
    pub(crate) fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        self.high_water = journal.high_water;
        for (id, prior) in journal.records {
            match prior {
                Some(session) => {
                    self.sessions.insert(id, session);
                }
                None => {
                    self.sessions.remove(&id);
                }
            }
        }
        debug!(high_water = ?self.high_water, "registry rolled back");
    }

    fn touch(&mut self, id: SessionId) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        if !journal.records.contains_key(&id) {
            journal.records.insert(id, self.sessions.get(&id).cloned());
        }
    }

    /// All records in identifier order
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Number of records held, closed tombstones included
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats::default();
        for session in self.sessions.values() {
            match session.state {
                SessionState::Pending => stats.pending += 1,
                SessionState::Open => stats.open += 1,
                SessionState::Unregistering => stats.unregistering += 1,
                SessionState::Expiring => stats.expiring += 1,
                SessionState::Closed => stats.closed += 1,
            }
            stats.queued_messages += session.queue.len();
        }
        stats
    }

    /// Drop closed records that have been retained for `retention` indexes
    pub fn reclaim(&mut self, index: Index, retention: u64) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| {
                s.closed_at
                    .is_some_and(|closed| index.saturating_sub(closed) >= retention)
            })
            .map(|s| s.id)
            .collect();

        for id in &expired {
            self.touch(*id);
            self.sessions.remove(id);
        }
        expired
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            high_water: self.high_water,
            sessions: self.sessions.values().cloned().collect(),
        }
    }

    /// Rebuild a registry from a snapshot
    pub fn restore(snapshot: RegistrySnapshot) -> Result<Self, SnapshotError> {
        let mut sessions = BTreeMap::new();
        for session in snapshot.sessions {
            if !snapshot.high_water.is_some_and(|high| session.id <= high) {
                return Err(SnapshotError::Inconsistent(format!(
                    "session {} is above the high-water mark",
                    session.id
                )));
            }
            let id = session.id;
            if sessions.insert(id, session).is_some() {
                return Err(SnapshotError::Inconsistent(format!(
                    "session {id} appears twice"
                )));
            }
        }

        Ok(Self {
            sessions,
            high_water: snapshot.high_water,
            journal: None,
        })
    }
}
