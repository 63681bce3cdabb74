//! Snapshot format for the session subsystem
//!
//! A snapshot holds the full registry, queued messages included, and the
//! index it was taken at. Deferred tasks are closures and are not captured;
//! schedule anything that must survive a restore from state the handler
//! snapshots itself.

use serde::{Deserialize, Serialize};

use crate::Index;
use crate::error::SnapshotError;
use crate::session::RegistrySnapshot;

/// Serialized state machine contents between apply steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachineSnapshot {
    pub last_applied: Index,
    pub registry: RegistrySnapshot,
}

impl StateMachineSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}
