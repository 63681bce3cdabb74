//! Deferred callbacks
//!
//! Observers and command handlers cannot usefully publish to a session that
//! is still `Pending`. Instead they schedule a task, and the apply pipeline
//! runs it at the start of a later apply step, by which time registration
//! has completed. Tasks are keyed by committed index, so every replica runs
//! them at the same point in the log.

use std::collections::BTreeMap;

use crate::Index;
use crate::listener::SessionContext;

/// A callback run at the start of a later apply step
pub type Task = Box<dyn FnOnce(&mut SessionContext<'_>) + Send>;

/// Tasks waiting for their apply step
#[derive(Default)]
pub struct DeferredExecutor {
    /// Keyed by (due index, scheduling order)
    tasks: BTreeMap<(Index, u64), Task>,
    next_seq: u64,
}

impl DeferredExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` for the first apply step at or after `due`
    pub fn schedule(&mut self, due: Index, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert((due, seq), task);
    }

    /// Remove and return every task due at `index`, in scheduling order
    pub fn take_due(&mut self, index: Index) -> Vec<Task> {
        let later = self.tasks.split_off(&(index.saturating_add(1), 0));
        let due = std::mem::replace(&mut self.tasks, later);
        due.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop every scheduled task
    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

impl std::fmt::Debug for DeferredExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredExecutor")
            .field("pending", &self.tasks.len())
            .finish()
    }
}
