//! Fan-out of state changes to anonymous observers.
//!
//! [`BroadcastHub`] keeps one bounded [`mpsc`] channel per registered
//! [`Observer`]. Publishing uses `try_send` only, so a slow or dead observer
//! can never hold up delivery to the others: a full or closed channel simply
//! removes that observer from the registry, and its [`Observer::recv`] then
//! returns `None` once the already-buffered payloads are drained.
//!
//! ## Ordering
//!
//! Payloads sent through [`BroadcastHub::publish_versioned`] carry the version
//! of the state they describe. The hub remembers the newest version it has
//! delivered and drops anything older, so two publishers racing after leaving
//! the store's critical section cannot reorder snapshots for any observer.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default per-observer buffer, in payloads.
pub const DEFAULT_OBSERVER_BUFFER: usize = 32;

/// Registry key for an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Receiving end handed to a registered observer.
#[derive(Debug)]
pub struct Observer<T> {
    id: ObserverId,
    rx: mpsc::Receiver<T>,
}

impl<T> Observer<T> {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Waits for the next payload. Returns `None` once the hub has dropped
    /// this observer and the buffer is empty.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns a buffered payload without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// What a single publish did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Observers that accepted the payload.
    pub delivered: usize,
    /// Observers removed because their channel was full or closed.
    pub pruned: usize,
    /// `true` when the payload was older than one already delivered and was
    /// not sent at all.
    pub stale: bool,
}

#[derive(Debug)]
struct Registry<T> {
    observers: HashMap<ObserverId, mpsc::Sender<T>>,
    next_id: u64,
    last_version: Option<u64>,
}

/// Registry of live observers with non-blocking fan-out.
#[derive(Debug)]
pub struct BroadcastHub<T> {
    registry: Mutex<Registry<T>>,
    capacity: usize,
}

impl<T: Clone> Default for BroadcastHub<T> {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_BUFFER)
    }
}

impl<T: Clone> BroadcastHub<T> {
    /// Creates a hub whose observers each buffer up to `capacity` payloads.
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry {
                observers: HashMap::new(),
                next_id: 0,
                last_version: None,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Registers a new observer.
    pub fn register(&self) -> Observer<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.insert(tx, rx)
    }

    /// Registers a new observer whose first payload is `initial`.
    ///
    /// Callers that hold the lock guarding their own state while calling this
    /// and [`publish`](Self::publish) get the current state followed by every
    /// later change, with nothing repeated.
    pub fn register_with(&self, initial: T) -> Observer<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        // A fresh channel always has room for one payload.
        let _ = tx.try_send(initial);
        self.insert(tx, rx)
    }

    fn insert(&self, tx: mpsc::Sender<T>, rx: mpsc::Receiver<T>) -> Observer<T> {
        let mut registry = self.registry.lock();
        let id = ObserverId(registry.next_id);
        registry.next_id += 1;
        registry.observers.insert(id, tx);

        #[cfg(feature = "tracing")]
        tracing::debug!(observer = id.0, total = registry.observers.len(), "Observer registered");

        Observer { id, rx }
    }

    /// Removes an observer. Returns `false` if it was already gone.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let removed = self.registry.lock().observers.remove(&id).is_some();

        #[cfg(feature = "tracing")]
        if removed {
            tracing::debug!(observer = id.0, "Observer unregistered");
        }

        removed
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.registry.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `payload` to every registered observer.
    ///
    /// Payloads arrive in call order, so callers that publish from inside
    /// their own critical section need no version.
    pub fn publish(&self, payload: T) -> Delivery {
        let mut registry = self.registry.lock();
        Self::fan_out(&mut registry, payload)
    }

    /// Delivers `payload` unless a newer version has already gone out.
    ///
    /// Re-publishing the current version is allowed; only strictly older
    /// versions are dropped.
    pub fn publish_versioned(&self, version: u64, payload: T) -> Delivery {
        let mut registry = self.registry.lock();

        if registry.last_version.is_some_and(|last| version < last) {
            #[cfg(feature = "tracing")]
            tracing::trace!(version, "Dropped stale payload");
            return Delivery {
                stale: true,
                ..Delivery::default()
            };
        }
        registry.last_version = Some(version);

        Self::fan_out(&mut registry, payload)
    }

    fn fan_out(registry: &mut Registry<T>, payload: T) -> Delivery {
        let mut delivery = Delivery::default();

        registry.observers.retain(|_id, tx| match tx.try_send(payload.clone()) {
            Ok(()) => {
                delivery.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(observer = _id.0, "Observer is not keeping up, dropping it");
                delivery.pruned += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                delivery.pruned += 1;
                false
            }
        });

        delivery
    }
}
