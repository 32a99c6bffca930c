//! In-process event bus backed by a tokio broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use crate::bus::{BusError, EventBus, Subscription};

const DEFAULT_CAPACITY: usize = 1024;

/// In-memory broadcast bus.
///
/// Bounded: once `capacity` messages are queued for a slow subscriber the
/// oldest are dropped for that subscriber only. Publishers never wait.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    sender: broadcast::Sender<M>,
    closed: AtomicBool,
}

impl<M: Clone> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            closed: AtomicBool::new(false),
        }
    }

    /// Stop accepting publications. Existing subscribers drain what is queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<M: Clone> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + Sync + 'static,
{
    fn publish(&self, message: M) -> Result<usize, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        // `send` only fails when nobody is listening, which is fine for a
        // best-effort push channel.
        Ok(self.sender.send(message).unwrap_or(0))
    }

    fn subscribe(&self) -> Subscription<M> {
        Subscription::new(self.sender.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_each_message() {
        let bus = InMemoryEventBus::<u32>::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(7).unwrap(), 2);

        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let bus = InMemoryEventBus::<u32>::new();
        assert_eq!(bus.publish(1).unwrap(), 0);
    }

    #[test]
    fn closed_bus_rejects_publish() {
        let bus = InMemoryEventBus::<u32>::new();
        bus.close();
        assert_eq!(bus.publish(1), Err(BusError::Closed));
    }

    #[test]
    fn lagging_subscriber_skips_oldest_messages() {
        let bus = InMemoryEventBus::<u32>::with_capacity(2);
        let mut sub = bus.subscribe();
        for n in 0..5 {
            bus.publish(n).unwrap();
        }

        let mut seen = Vec::new();
        while let Some(n) = sub.try_recv() {
            seen.push(n);
        }

        assert_eq!(seen, vec![3, 4]);
        assert_eq!(sub.missed(), 3);
    }
}
