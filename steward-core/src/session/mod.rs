//! Session records, lifecycle transitions, and expiration

pub mod expiry;
pub mod registry;
pub mod state;

// Re-export key types for convenience
pub use expiry::ExpirationScheduler;
pub use registry::{
    Metadata, RegistrySnapshot, Session, SessionHandle, SessionRegistry, SessionStats,
};
pub use state::{Callback, SessionId, SessionState, SessionStateMachine, Step, Transition};
