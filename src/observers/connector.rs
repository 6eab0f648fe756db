//! # Observer Connection
//!
//! [`ObserverSet`] holds observers of one kind keyed by connection id.
//! [`ConnectHandle`] detaches its observer when disconnected or dropped.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

struct ObserverSetInner<T: ?Sized> {
    observers: RwLock<Vec<(u64, Arc<T>)>>,
    next_id: AtomicU64,
}

/// Thread-safe set of observers that can change while messages are in flight
pub struct ObserverSet<T: ?Sized> {
    inner: Arc<ObserverSetInner<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ObserverSet<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObserverSetInner {
                observers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Attach an observer; it stays attached while the returned handle lives
    pub fn connect(&self, observer: Arc<T>) -> ConnectHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.observers.write().push((id, observer));

        let weak: Weak<ObserverSetInner<T>> = Arc::downgrade(&self.inner);
        ConnectHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.write().retain(|(existing, _)| *existing != id);
                debug!(connection_id = id, "Observer disconnected");
            }
        })
    }

    /// Point-in-time copy for fan-out without holding the lock across awaits
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.inner
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Detaches an observer on [`ConnectHandle::disconnect`] or drop
#[must_use = "dropping a ConnectHandle immediately disconnects the observer"]
pub struct ConnectHandle {
    disconnect: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl ConnectHandle {
    fn new<F>(disconnect: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            disconnect: Some(Box::new(disconnect)),
        }
    }

    /// Detach the observer. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }

    /// Leave the observer attached for the lifetime of its set
    pub fn keep(mut self) {
        self.disconnect = None;
    }

    pub fn is_connected(&self) -> bool {
        self.disconnect.is_some()
    }
}

impl std::fmt::Debug for ConnectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectHandle")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for ConnectHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}
