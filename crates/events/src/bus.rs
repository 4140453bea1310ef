//! Event publishing/subscription abstraction (mechanics only).
//!
//! This is the "outside world" the bridge publishes persisted events to.
//! The bridge calls `publish` only after the write that produced an event is
//! durable; the bus itself makes no promise beyond handing the message to its
//! current subscribers.
//!
//! ## Delivery
//!
//! - **Synchronous**: `publish` returns once every subscriber has been handed the message
//! - **Ordered per publisher**: messages arrive in the order one publisher sent them
//! - **No persistence**: the event store is the source of truth, the bus only distributes

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event bus.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics). Meant to be consumed by one thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything received so far, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Pub/sub bus the bridge publishes persisted events to.
///
/// `publish` can fail (closed transport, poisoned state). The error is handed
/// back to the caller unchanged; the bridge never retries.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
