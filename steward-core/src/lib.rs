//! steward-core: session lifecycle and event delivery for replicated state machines
//!
//! This crate tracks client sessions on top of a consensus log and delivers
//! server-to-client event messages to them. Everything is driven by the
//! committed entry stream, so every replica that applies the same log
//! reaches the same session states, fires the same callbacks, and delivers
//! the same messages.
//!
//! - **Sessions** - [`SessionRegistry`] owns the records and
//!   [`SessionStateMachine`] holds the legal transitions
//! - **Events** - [`EventPublisher`] queues messages for open sessions
//! - **Expiration** - [`ExpirationScheduler`] expires sessions by index, never
//!   by wall clock
//! - **Observers** - [`SessionListener`] and [`ListenerDispatcher`] for the
//!   register/unregister/expire/close callbacks
//! - **Pipeline** - [`ReplicatedStateMachine`] applies committed entries
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use steward_core::{
//!     ChannelTransport, Entry, Metadata, ReplicatedStateMachine, SessionConfig, SessionId,
//! };
//!
//! let (transport, mut deliveries) = ChannelTransport::new();
//! let mut machine = ReplicatedStateMachine::builder(SessionConfig::with_timeout(100))
//!     .transport(Arc::new(transport))
//!     .build();
//!
//! let id = SessionId::new(1);
//! machine
//!     .apply(1, Entry::RegisterSession { session: id, metadata: Metadata::new() })
//!     .unwrap();
//! machine
//!     .apply(2, Entry::Command { session: id, payload: json!({"op": "noop"}) })
//!     .unwrap();
//! assert!(deliveries.try_recv().is_err());
//! ```
//!
//! # Architecture
//!
//! ```text
//! committed entry
//!       │
//!       ▼
//! ┌──────────────────────────────────────────────┐
//! │            ReplicatedStateMachine            │
//! │  ┌────────────────┐   ┌──────────────────┐   │
//! │  │ SessionRegistry│◄──│ SessionStateMach.│   │
//! │  └───────┬────────┘   └──────────────────┘   │
//! │          │                                   │
//! │  ┌───────▼────────┐   ┌──────────────────┐   │
//! │  │ EventPublisher │   │ListenerDispatcher│   │
//! │  └───────┬────────┘   └──────────────────┘   │
//! └──────────┼───────────────────────────────────┘
//!            ▼
//!        Transport (fire-and-forget)
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod listener;
pub mod machine;
pub mod session;
pub mod transport;

/// Position of an entry in the committed log
pub type Index = u64;

// Re-export key types for convenience
pub use config::SessionConfig;
pub use error::{ApplyError, ConfigError, SessionError, SnapshotError, StewardError, StewardResult};
pub use events::{Delivery, EventMessage, EventPublisher, PublisherStats};
pub use executor::{DeferredExecutor, Task};
pub use listener::{ListenerDispatcher, SessionContext, SessionListener, SessionRequest};
pub use machine::{
    ApplyOutput, CommandHandler, Committed, Entry, MachineStats, NoopHandler,
    ReplicatedStateMachine, StateMachineBuilder, StateMachineSnapshot,
};
pub use session::{
    Callback, ExpirationScheduler, Metadata, Session, SessionHandle, SessionId, SessionRegistry,
    SessionState, SessionStateMachine, SessionStats, Transition,
};
pub use transport::{ChannelTransport, NullTransport, Transport};
