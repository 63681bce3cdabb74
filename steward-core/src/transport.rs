//! Outbound delivery collaborator
//!
//! The apply pipeline hands every flushed batch to a [`Transport`] after the
//! apply step completes. Delivery is fire-and-forget: nothing a transport
//! does feeds back into session state, and retries are its own business.

use tokio::sync::mpsc;
use tracing::debug;

use crate::events::Delivery;

/// Receives flushed messages, one call per session per apply step
///
/// Implementations must not block; hand the batch to another task instead.
pub trait Transport: Send + Sync {
    fn deliver(&self, delivery: Delivery);
}

/// Forwards deliveries over an unbounded tokio channel
///
/// The receiving half is typically drained by an async task that owns the
/// client connections.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its deliveries arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn deliver(&self, delivery: Delivery) {
        let session = delivery.session;
        // Ignore if the receiver is gone
        if self.tx.send(delivery).is_err() {
            debug!(session = %session, "delivery receiver closed; discarding batch");
        }
    }
}

/// Discards every delivery
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn deliver(&self, _delivery: Delivery) {}
}
