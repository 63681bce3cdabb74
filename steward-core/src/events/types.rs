//! Event message type definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Index;
use crate::session::SessionId;

/// A server-to-client event message queued on a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Index of the apply step that enqueued the message
    pub index: Index,
    /// Event name chosen by the publisher
    pub event: String,
    /// Arbitrary JSON payload
    #[serde(default)]
    pub payload: Value,
}

impl EventMessage {
    pub fn new(index: Index, event: impl Into<String>, payload: Value) -> Self {
        Self {
            index,
            event: event.into(),
            payload,
        }
    }
}

/// Messages flushed for one session during one apply step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub session: SessionId,
    /// Index of the apply step that flushed the messages
    pub index: Index,
    pub messages: Vec<EventMessage>,
}

impl Delivery {
    /// Event names in delivery order
    pub fn event_names(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.event.as_str()).collect()
    }
}
