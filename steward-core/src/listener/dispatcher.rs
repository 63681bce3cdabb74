//! ListenerDispatcher: fans lifecycle callbacks out to observers

use tracing::trace;

use crate::session::{Callback, SessionHandle};

use super::{SessionContext, SessionListener};

/// Observers in registration order
#[derive(Default)]
pub struct ListenerDispatcher {
    listeners: Vec<Box<dyn SessionListener>>,
}

impl ListenerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer; it is called after every observer added before it
    pub fn add(&mut self, listener: Box<dyn SessionListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Invoke every callback in `callbacks` on every observer
    ///
    /// Callbacks run in sequence order; within one callback, observers run
    /// in registration order. Everything is synchronous.
    pub fn dispatch(
        &mut self,
        callbacks: &[Callback],
        session: &SessionHandle,
        ctx: &mut SessionContext<'_>,
    ) {
        for callback in callbacks {
            trace!(session = %session.id, %callback, observers = self.listeners.len(), "dispatching");
            for listener in &mut self.listeners {
                match callback {
                    Callback::Register => listener.register(session, ctx),
                    Callback::Unregister => listener.unregister(session, ctx),
                    Callback::Expire => listener.expire(session, ctx),
                    Callback::Close => listener.close(session, ctx),
                }
            }
        }
    }
}

impl std::fmt::Debug for ListenerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerDispatcher")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
