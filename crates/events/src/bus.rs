//! Event publishing/subscription abstraction.
//!
//! The bus only distributes; it stores nothing. The ledger tables remain the
//! source of truth, so a listener that misses messages (slow consumer, restart)
//! re-reads state instead of relying on redelivery.
//!
//! Delivery is best-effort:
//! - publishing never blocks the publisher
//! - a subscriber that falls more than the bus capacity behind skips the
//!   oldest messages and is told how many it lost
//! - publishing with no subscribers is not an error

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus has been shut down.
    #[error("event bus closed")]
    Closed,
}

/// A subscription to a bus (broadcast semantics: each subscription receives
/// every message published after it was created).
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: broadcast::Receiver<M>,
    missed: u64,
}

impl<M: Clone> Subscription<M> {
    pub fn new(receiver: broadcast::Receiver<M>) -> Self {
        Self { receiver, missed: 0 }
    }

    /// Wait for the next message. Returns `None` once the bus is closed.
    ///
    /// Messages dropped because this subscriber lagged are skipped and counted
    /// in [`Subscription::missed`].
    pub async fn recv(&mut self) -> Option<M> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    tracing::warn!(skipped, "subscriber lagged behind event bus");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive without waiting. `None` when nothing is queued (or the bus closed).
    pub fn try_recv(&mut self) -> Option<M> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                }
                Err(_) => return None,
            }
        }
    }

    /// Total number of messages skipped because this subscriber lagged.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

/// Publish/subscribe transport for committed ledger events.
pub trait EventBus<M>: Send + Sync {
    /// Publish a message; returns how many subscribers it was handed to.
    fn publish(&self, message: M) -> Result<usize, BusError>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    fn publish(&self, message: M) -> Result<usize, BusError> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
