//! EventPublisher: per-session outbound queues
//!
//! Messages live on the session record they are addressed to. The publisher
//! decides eligibility at enqueue time (only `Open` sessions accept messages)
//! and again at flush time (only sessions still `Open` are drained).
//!
//! A message enqueued during apply step *i* becomes pending at step *i + 1*
//! and is flushed after that step's session transitions. A session that
//! leaves `Open` in the meantime loses the message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::Index;
use crate::session::{SessionId, SessionRegistry, SessionState};

use super::types::{Delivery, EventMessage};

/// Message counters since construction or the last restore
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherStats {
    /// Messages accepted onto a queue
    pub published: u64,
    /// Messages refused at enqueue or discarded when a session left `Open`
    pub dropped: u64,
    /// Messages handed out by a flush
    pub delivered: u64,
}

/// Enqueues and flushes event messages on registry sessions
#[derive(Debug, Default)]
pub struct EventPublisher {
    /// Index of the apply step in progress
    current_index: Index,
    stats: PublisherStats,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of the apply step at `index`
    pub(crate) fn begin(&mut self, index: Index) {
        self.current_index = index;
    }

    pub fn current_index(&self) -> Index {
        self.current_index
    }

    pub fn stats(&self) -> PublisherStats {
        self.stats
    }

    /// Put the counters back to an earlier reading
    pub(crate) fn restore_stats(&mut self, stats: PublisherStats) {
        self.stats = stats;
    }

    pub(crate) fn record_dropped(&mut self, count: usize) {
        self.stats.dropped += count as u64;
    }

    /// Append a message to `session`'s queue if it is `Open`
    ///
    /// Any other state, or an unknown session, is a silent no-op. Returns
    /// whether the message was queued.
    pub fn enqueue(
        &mut self,
        registry: &mut SessionRegistry,
        session: SessionId,
        event: impl Into<String>,
        payload: Value,
    ) -> bool {
        let event = event.into();
        let Some(record) = registry
            .get_mut(session)
            .filter(|s| s.state() == SessionState::Open)
        else {
            debug!(session = %session, event = %event, "dropping message for session not open");
            self.stats.dropped += 1;
            return false;
        };

        trace!(session = %session, event = %event, index = self.current_index, "message queued");
        record
            .queue_mut()
            .push_back(EventMessage::new(self.current_index, event, payload));
        self.stats.published += 1;
        true
    }

    /// Drain the messages pending for `session`
    ///
    /// Pending means enqueued before the current apply step. Returns an
    /// empty list for sessions that are not `Open`.
    pub fn flush(&mut self, registry: &mut SessionRegistry, session: SessionId) -> Vec<EventMessage> {
        let current = self.current_index;
        let Some(record) = registry
            .get_mut(session)
            .filter(|s| s.state() == SessionState::Open)
        else {
            return Vec::new();
        };

        let queue = record.queue_mut();
        let ready = queue.iter().take_while(|m| m.index < current).count();
        let messages: Vec<EventMessage> = queue.drain(..ready).collect();
        self.stats.delivered += messages.len() as u64;
        messages
    }

    /// Flush every `Open` session with pending messages, in identifier order
    pub fn flush_all(&mut self, registry: &mut SessionRegistry) -> Vec<Delivery> {
        let current = self.current_index;
        let ready: Vec<SessionId> = registry
            .sessions()
            .filter(|s| s.state() == SessionState::Open)
            .filter(|s| s.queue().front().is_some_and(|m| m.index < current))
            .map(|s| s.id())
            .collect();

        ready
            .into_iter()
            .map(|session| Delivery {
                session,
                index: current,
                messages: self.flush(registry, session),
            })
            .collect()
    }
}
