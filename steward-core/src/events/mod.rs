//! Event messages and per-session delivery queues

pub mod publisher;
pub mod types;

// Re-export key types for convenience
pub use publisher::{EventPublisher, PublisherStats};
pub use types::{Delivery, EventMessage};
