//! Index-driven session expiration
//!
//! Expiration never consults a clock. A session is expired when the index of
//! a committed tick is at least `session_timeout` indexes past the session's
//! last keep-alive, so every replica reaches the same decision from the same
//! log.

use std::collections::BTreeSet;

use crate::Index;

use super::registry::SessionRegistry;
use super::state::SessionId;

/// Detects keep-alive-starved sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationScheduler {
    session_timeout: u64,
}

impl ExpirationScheduler {
    pub fn new(session_timeout: u64) -> Self {
        Self { session_timeout }
    }

    pub fn session_timeout(&self) -> u64 {
        self.session_timeout
    }

    /// Live sessions whose last keep-alive is too far behind `current_index`
    ///
    /// Sessions already closing or closed are skipped: a session that lost a
    /// race to an earlier unregister never shows up here.
    pub fn tick(&self, registry: &SessionRegistry, current_index: Index) -> BTreeSet<SessionId> {
        registry
            .sessions()
            .filter(|s| s.state().is_live())
            .filter(|s| current_index.saturating_sub(s.last_keep_alive()) >= self.session_timeout)
            .map(|s| s.id())
            .collect()
    }
}
