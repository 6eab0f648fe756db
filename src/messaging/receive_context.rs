//! # Receive Context
//!
//! Per-message processing context: the received message, the cooperative
//! cancellation signal, the optional delivery lock, the observer registry and a
//! dispose stack.
//!
//! Disposal is the single release path. `dispose()` runs registered callbacks in
//! reverse registration order exactly once, then releases the lock context. It is
//! also invoked from `Drop`, so a dispatch future that is dropped mid-flight still
//! cleans up.

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use super::lock::LockContext;
use super::message::ReceivedMessage;
use crate::observers::ObserverRegistry;

type DisposeCallback = Box<dyn FnOnce() + Send + 'static>;

/// One inbound message under processing
pub struct ReceiveContext {
    message: ReceivedMessage,
    cancellation: CancellationToken,
    lock: Mutex<Option<Arc<LockContext>>>,
    observers: Arc<ObserverRegistry>,
    dispose_stack: Mutex<Vec<DisposeCallback>>,
    disposed: AtomicBool,
    payloads: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    received_at: Instant,
}

impl std::fmt::Debug for ReceiveContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveContext")
            .field("message_id", &self.message.message_id)
            .field("message_type", &self.message.message_type)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("has_lock", &self.lock.lock().is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ReceiveContext {
    /// Create a context with its own cancellation token
    pub fn new(message: ReceivedMessage, observers: Arc<ObserverRegistry>) -> Self {
        Self::with_cancellation(message, observers, CancellationToken::new())
    }

    /// Create a context whose cancellation is driven by `cancellation`
    pub fn with_cancellation(
        message: ReceivedMessage,
        observers: Arc<ObserverRegistry>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            message,
            cancellation,
            lock: Mutex::new(None),
            observers,
            dispose_stack: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            payloads: Mutex::new(HashMap::new()),
            received_at: Instant::now(),
        }
    }

    pub fn message(&self) -> &ReceivedMessage {
        &self.message
    }

    pub fn message_id(&self) -> Uuid {
        self.message.message_id
    }

    pub fn message_type(&self) -> &str {
        &self.message.message_type
    }

    pub fn correlation_id(&self) -> Uuid {
        self.message.effective_correlation_id()
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    /// Token observed by every stage at its own suspension points
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Request cooperative cancellation of in-flight stages
    pub fn cancel(&self) {
        if !self.cancellation.is_cancelled() {
            debug!(message_id = %self.message.message_id, "Receive context cancellation requested");
            self.cancellation.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Bind the delivery lock; released on dispose
    pub fn bind_lock(&self, lock: Arc<LockContext>) {
        *self.lock.lock() = Some(lock);
    }

    pub fn lock(&self) -> Option<Arc<LockContext>> {
        self.lock.lock().clone()
    }

    /// Attach transport- or pipeline-specific data
    pub fn insert_payload<T: Any + Send + Sync>(&self, payload: T) {
        self.payloads.lock().insert(TypeId::of::<T>(), Arc::new(payload));
    }

    pub fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.payloads
            .lock()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|payload| payload.downcast::<T>().ok())
    }

    /// Register a callback run during disposal (last registered runs first).
    ///
    /// Registering after disposal runs the callback immediately.
    pub fn register_dispose<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut stack = self.dispose_stack.lock();
            if !self.disposed.load(Ordering::Acquire) {
                stack.push(Box::new(callback));
                return;
            }
        }
        self.run_callback(Box::new(callback));
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Run the dispose stack and release the lock context. Idempotent.
    pub fn dispose(&self) {
        let callbacks = {
            let mut stack = self.dispose_stack.lock();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *stack)
        };

        for callback in callbacks.into_iter().rev() {
            self.run_callback(callback);
        }

        self.lock.lock().take();
        self.payloads.lock().clear();

        debug!(
            message_id = %self.message.message_id,
            elapsed_ms = self.received_at.elapsed().as_millis() as u64,
            "Receive context disposed"
        );
    }

    fn run_callback(&self, callback: DisposeCallback) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
            error!(
                message_id = %self.message.message_id,
                panic = ?panic,
                "Dispose callback panicked"
            );
        }
    }
}

impl Drop for ReceiveContext {
    fn drop(&mut self) {
        self.dispose();
    }
}
