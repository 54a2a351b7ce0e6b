//! Pending long-poll waiters.

use tokio::sync::oneshot;
use tracing::trace;

/// Owned by the reactor loop; only that loop registers and publishes.
#[derive(Debug)]
pub struct NotificationHub<T> {
    waiters: Vec<oneshot::Sender<T>>,
}

impl<T: Clone> NotificationHub<T> {
    pub fn new() -> Self {
        Self { waiters: Vec::new() }
    }

    /// Queues `waiter` for the next publish. Waiters whose receiver is gone
    /// (the HTTP client hung up) are dropped here.
    pub fn register_waiter(&mut self, waiter: oneshot::Sender<T>) {
        self.waiters.retain(|w| !w.is_closed());
        self.waiters.push(waiter);
    }

    /// Resolves every pending waiter with `payload` and empties the list.
    /// Returns how many were delivered.
    pub fn publish(&mut self, payload: &T) -> usize {
        let delivered = self
            .waiters
            .drain(..)
            .filter(|w| !w.is_closed())
            .filter_map(|w| w.send(payload.clone()).ok())
            .count();
        trace!(delivered, "published preview");
        delivered
    }

    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

impl<T: Clone> Default for NotificationHub<T> {
    fn default() -> Self {
        Self::new()
    }
}
