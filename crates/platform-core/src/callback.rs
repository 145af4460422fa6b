//! Callback delivery from hardware contexts into the owning component.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Sending half of a single-consumer event queue.
///
/// Backends hold one of these per outstanding request and post the outcome
/// from whatever thread the hardware calls back on. The owning component is
/// the only reader, so no state is ever mutated from a callback context.
pub struct CallbackSink<E> {
    tx: UnboundedSender<E>,
}

impl<E> CallbackSink<E> {
    pub fn new(tx: UnboundedSender<E>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiver that drains it.
    pub fn channel() -> (Self, UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Post an event. Returns `false` when the owner has gone away, in which
    /// case the event is discarded.
    pub fn post(&self, event: E) -> bool {
        if self.tx.send(event).is_err() {
            tracing::debug!("Callback receiver dropped; discarding event");
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<E> Clone for CallbackSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> std::fmt::Debug for CallbackSink<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
