//! In-process fan-out of processed events to live subscribers.
//!
//! Each subscriber owns a bounded queue. Broadcasting never waits: an event
//! that does not fit in a subscriber's queue is dropped for that subscriber
//! only. Subscribers that miss events recover them from history on their
//! next connect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::envelope::Envelope;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Opaque handle identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A registered subscriber's receiving end.
pub struct Subscription<T> {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Arc<Envelope<T>>>,
}

type Registry<T> = HashMap<SubscriberId, mpsc::Sender<Arc<Envelope<T>>>>;

/// Registry of subscriber queues.
pub struct Broadcaster<T> {
    subscribers: RwLock<Registry<T>>,
    next_id: AtomicU64,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> Broadcaster<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry<T>> {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry<T>> {
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a queue and add it to the registry.
    pub fn register(&self) -> Subscription<T> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.capacity);

        let count = {
            let mut subscribers = self.write();
            subscribers.insert(id, sender);
            subscribers.len()
        };

        debug!(subscriber = id.0, subscribers = count, "Subscriber registered");
        Subscription { id, receiver }
    }

    /// Remove a subscriber and close its queue. Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        let (removed, count) = {
            let mut subscribers = self.write();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };

        if removed {
            debug!(subscriber = id.0, subscribers = count, "Subscriber unregistered");
        }
    }

    /// Offer `envelope` to every subscriber without waiting.
    ///
    /// Returns the number of queues that accepted it.
    pub fn broadcast(&self, envelope: Arc<Envelope<T>>) -> usize {
        let subscribers = self.read();
        let mut delivered = 0;

        for (id, sender) in subscribers.iter() {
            match sender.try_send(Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        subscriber = id.0,
                        envelope_id = %envelope.id(),
                        "Subscriber queue full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = id.0, "Subscriber queue closed, awaiting unregister");
                }
            }
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.read().len()
    }

    /// Events dropped because a subscriber's queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
