//! Lifecycle observers
//!
//! State machine authors implement [`SessionListener`] to react to sessions
//! being registered, unregistered by their client, expired by the cluster,
//! and finally closed.
//!
//! # Ordering
//!
//! - `register` fires once, while the session is still `Pending`. Messages
//!   published to the registering session from inside `register` are lost;
//!   schedule a task with [`SessionContext::execute`] to publish once the
//!   session is open.
//! - Exactly one of `unregister` or `expire` fires before `close`, and
//!   `close` always follows it. Messages published to the closing session
//!   from these callbacks are lost.
//! - Publishing to *other* open sessions is allowed from any callback; the
//!   messages go out on the next apply step.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use steward_core::listener::{SessionContext, SessionListener};
//! use steward_core::session::SessionHandle;
//!
//! struct Greeter;
//!
//! impl SessionListener for Greeter {
//!     fn register(&mut self, session: &SessionHandle, ctx: &mut SessionContext<'_>) {
//!         let id = session.id;
//!         ctx.execute(move |ctx| {
//!             ctx.publish(id, "welcome", json!("hello"));
//!         });
//!     }
//! }
//! ```

pub mod context;
pub mod dispatcher;

pub use context::{SessionContext, SessionRequest};
pub use dispatcher::ListenerDispatcher;

use crate::session::SessionHandle;

/// Observer of session lifecycle changes
///
/// Every method defaults to doing nothing, so observers only implement the
/// callbacks they care about.
pub trait SessionListener: Send {
    /// A session was registered and is still `Pending`
    fn register(&mut self, _session: &SessionHandle, _ctx: &mut SessionContext<'_>) {}

    /// The client closed its session; `close` follows
    fn unregister(&mut self, _session: &SessionHandle, _ctx: &mut SessionContext<'_>) {}

    /// The session missed its keep-alive window; `close` follows
    fn expire(&mut self, _session: &SessionHandle, _ctx: &mut SessionContext<'_>) {}

    /// The session is gone
    fn close(&mut self, _session: &SessionHandle, _ctx: &mut SessionContext<'_>) {}
}
