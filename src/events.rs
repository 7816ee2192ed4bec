//! Publish/subscribe registry used by the poller's notification channels.
//!
//! Each subscriber gets its own unbounded queue, so every event published
//! after `subscribe()` reaches it in publish order. Dropping a
//! [`Subscription`] unsubscribes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Token identifying one subscription on an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Listeners<T> = Mutex<HashMap<SubscriptionId, UnboundedSender<T>>>;

pub struct EventBus<T> {
    listeners: Arc<Listeners<T>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(id, tx);
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    /// Removes a subscription by token. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Delivers `event` to every live subscriber and returns how many got it.
    pub fn publish(&self, event: &T) -> usize {
        let mut listeners = self.lock();
        listeners.retain(|_, tx| tx.send(event.clone()).is_ok());
        listeners.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, UnboundedSender<T>>> {
        self.listeners.lock().expect("event bus lock poisoned")
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of an [`EventBus`] subscription.
pub struct Subscription<T> {
    id: SubscriptionId,
    rx: UnboundedReceiver<T>,
    registry: Weak<Listeners<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut listeners) = registry.lock() {
                listeners.remove(&self.id);
            }
        }
    }
}
