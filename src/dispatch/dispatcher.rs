//! # Receive Pipe Dispatcher
//!
//! Runs a [`ReceivePipe`] for each received message while keeping delivery
//! counters, observer notifications and delivery-lock handling consistent on
//! every exit path.
//!
//! ```text
//! dispatch(ctx, lock)
//!   │ active += 1, total += 1, max = max(max, active)
//!   ├─► pre_receive
//!   ├─► pipe.process(ctx)
//!   │     ├─ Ok ─────────► complete lock ─► post_receive
//!   │     ├─ lock lost ──► receive_fault (once) ─► Err(LockLost)
//!   │     ├─ cancelled ──► receive_fault ─► abandon lock ─► Err(Cancelled)
//!   │     └─ fault ──────► receive_fault ─► abandon lock ─► Err(Faulted)
//!   ├─► ctx.dispose()
//!   └─► active -= 1  (== 0 ─► ZeroActivity)
//! ```
//!
//! The context is disposed before the counter drops. If the dispatch future
//! itself is dropped mid-flight, the same order holds: the context is dropped
//! (and disposed) before the active-dispatch guard.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::metrics::{DeliveryMetrics, DispatchCounters, ZeroActivity};
use super::pipe::{PipelineError, ReceivePipe};
use crate::config::DispatchConfig;
use crate::messaging::{LockContext, LockOutcome, MessagingError, ReceiveContext};
use crate::observers::{ConnectHandle, ObserverRegistry, ReceiveObserver};

/// How a dispatch ended, as seen by the caller
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// The broker no longer holds the message lock; it will be redelivered
    #[error("Delivery lock lost for message {message_id}: {source}")]
    LockLost {
        message_id: Uuid,
        source: MessagingError,
    },

    #[error("Message {message_id} faulted: {source}")]
    Faulted {
        message_id: Uuid,
        source: PipelineError,
    },

    #[error("Processing of message {message_id} was cancelled")]
    Cancelled { message_id: Uuid },

    #[error("Timed out after {timeout_ms}ms waiting for {active} active dispatches to drain")]
    DrainTimeout { active: usize, timeout_ms: u64 },
}

impl DispatchError {
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::LockLost { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn message_id(&self) -> Option<Uuid> {
        match self {
            Self::LockLost { message_id, .. }
            | Self::Faulted { message_id, .. }
            | Self::Cancelled { message_id } => Some(*message_id),
            Self::DrainTimeout { .. } => None,
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Lifecycle of one dispatch, used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Dispatching,
    Completed,
    Faulted,
    Cancelled,
    LockLost,
    Disposed,
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Dispatching => "dispatching",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
            Self::Cancelled => "cancelled",
            Self::LockLost => "lock_lost",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Successful dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub message_id: Uuid,
    /// `None` when no delivery lock was attached
    pub lock: Option<LockOutcome>,
    pub elapsed: Duration,
}

/// Dispatches received messages into a receive pipe
pub struct ReceivePipeDispatcher {
    name: String,
    pipe: Arc<dyn ReceivePipe>,
    observers: Arc<ObserverRegistry>,
    counters: Arc<DispatchCounters>,
}

impl std::fmt::Debug for ReceivePipeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivePipeDispatcher")
            .field("name", &self.name)
            .field("pipe", &self.pipe.name())
            .field("active", &self.counters.active_dispatch_count())
            .field("total", &self.counters.dispatch_count())
            .finish()
    }
}

impl ReceivePipeDispatcher {
    pub fn new(
        name: impl Into<String>,
        pipe: Arc<dyn ReceivePipe>,
        observers: Arc<ObserverRegistry>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            name: name.into(),
            pipe,
            observers,
            counters: Arc::new(DispatchCounters::new(config.zero_activity_capacity)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    /// Run the pipe for one message.
    ///
    /// The context is always disposed before this returns. When a lock is
    /// given it is completed on success and abandoned on fault or
    /// cancellation; a lost lock is left alone.
    pub async fn dispatch(
        &self,
        context: ReceiveContext,
        lock: Option<Arc<LockContext>>,
    ) -> DispatchResult<DispatchOutcome> {
        // Declaration order matters: `context` drops before `active`.
        let active = self.counters.begin();
        let context = context;
        let message_id = context.message_id();
        let started = Instant::now();

        debug!(
            dispatcher = %self.name,
            message_id = %message_id,
            message_type = %context.message_type(),
            state = %DispatchState::Dispatching,
            active = self.counters.active_dispatch_count(),
            "Dispatching message"
        );

        if let Some(lock) = &lock {
            context.bind_lock(Arc::clone(lock));
        }

        if self.observers.receive_observer_count() > 0 {
            self.observers.pre_receive(&context).await;
        }

        let processed = match AssertUnwindSafe(self.pipe.process(&context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(message_id = %message_id, pipe = self.pipe.name(), "Receive pipe panicked");
                Err(PipelineError::panicked(self.pipe.name()))
            }
        };

        let result = self
            .settle(&context, lock.as_deref(), processed, started)
            .await;

        match &result {
            Ok(_) => {
                if self.observers.receive_observer_count() > 0 {
                    self.observers.post_receive(&context).await;
                }
            }
            Err(fault) => {
                self.record(fault);
                if self.observers.receive_observer_count() > 0 {
                    self.observers.receive_fault(&context, fault).await;
                }
            }
        }

        context.dispose();
        debug!(message_id = %message_id, state = %DispatchState::Disposed, "Receive context released");
        drop(context);
        drop(active);

        result
    }

    async fn settle(
        &self,
        context: &ReceiveContext,
        lock: Option<&LockContext>,
        processed: Result<(), PipelineError>,
        started: Instant,
    ) -> DispatchResult<DispatchOutcome> {
        let message_id = context.message_id();

        match processed {
            Ok(()) => {
                let lock_outcome = match lock {
                    Some(lock) => match lock.complete().await {
                        Ok(outcome) => Some(outcome),
                        Err(err) if err.is_lock_lost() => {
                            return Err(self.lock_lost(message_id, lock, err));
                        }
                        Err(err) => {
                            warn!(message_id = %message_id, error = %err, "Failed to complete delivery lock");
                            Self::abandon(lock, message_id).await;
                            return Err(DispatchError::Faulted {
                                message_id,
                                source: PipelineError::from(err),
                            });
                        }
                    },
                    None => None,
                };

                debug!(message_id = %message_id, state = %DispatchState::Completed, "Message dispatched");
                Ok(DispatchOutcome {
                    message_id,
                    lock: lock_outcome,
                    elapsed: started.elapsed(),
                })
            }
            Err(fault) if fault.is_lock_lost() => {
                let source = match fault {
                    PipelineError::Messaging(err) => err,
                    other => MessagingError::internal(other.to_string()),
                };
                match lock {
                    Some(lock) => Err(self.lock_lost(message_id, lock, source)),
                    None => Err(DispatchError::LockLost { message_id, source }),
                }
            }
            Err(fault) if fault.is_cancelled() || context.is_cancelled() => {
                if let Some(lock) = lock {
                    Self::abandon(lock, message_id).await;
                }
                info!(message_id = %message_id, state = %DispatchState::Cancelled, reason = %fault, "Message processing cancelled");
                Err(DispatchError::Cancelled { message_id })
            }
            Err(fault) => {
                if let Some(lock) = lock {
                    Self::abandon(lock, message_id).await;
                }
                warn!(message_id = %message_id, state = %DispatchState::Faulted, error = %fault, "Message faulted");
                Err(DispatchError::Faulted {
                    message_id,
                    source: fault,
                })
            }
        }
    }

    fn lock_lost(
        &self,
        message_id: Uuid,
        lock: &LockContext,
        source: MessagingError,
    ) -> DispatchError {
        let recorded = lock.mark_lost();
        warn!(
            dispatcher = %self.name,
            message_id = %message_id,
            state = %DispatchState::LockLost,
            lock_state = %lock.state(),
            recorded,
            error = %source,
            "⚠️ Delivery lock lost; message will be redelivered"
        );
        DispatchError::LockLost { message_id, source }
    }

    async fn abandon(lock: &LockContext, message_id: Uuid) {
        if let Err(err) = lock.abandon().await {
            warn!(message_id = %message_id, error = %err, lock_lost = err.is_lock_lost(), "Failed to abandon delivery lock");
        }
    }

    fn record(&self, fault: &DispatchError) {
        match fault {
            DispatchError::LockLost { .. } => self.counters.record_lock_lost(),
            DispatchError::Cancelled { .. } => self.counters.record_cancelled(),
            DispatchError::Faulted { .. } | DispatchError::DrainTimeout { .. } => {
                self.counters.record_fault()
            }
        }
    }

    pub fn active_dispatch_count(&self) -> usize {
        self.counters.active_dispatch_count()
    }

    pub fn dispatch_count(&self) -> u64 {
        self.counters.dispatch_count()
    }

    pub fn max_concurrent_dispatch_count(&self) -> usize {
        self.counters.max_concurrent_dispatch_count()
    }

    pub fn metrics(&self) -> DeliveryMetrics {
        self.counters.snapshot()
    }

    /// Receive an event each time active dispatches return to zero
    pub fn subscribe_zero_activity(&self) -> broadcast::Receiver<ZeroActivity> {
        self.counters.subscribe_zero_activity()
    }

    /// Wait for in-flight dispatches to finish
    pub async fn drain(&self, timeout: Duration) -> DispatchResult<()> {
        if self.counters.wait_for_idle(timeout).await {
            Ok(())
        } else {
            Err(DispatchError::DrainTimeout {
                active: self.counters.active_dispatch_count(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    pub fn connect_receive_observer(&self, observer: Arc<dyn ReceiveObserver>) -> ConnectHandle {
        self.observers.connect_receive_observer(observer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{InMemoryTransportLock, LockLostKind, LockState, ReceivedMessage};
    use crate::observers::ObserverResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Succeed,
        Fail,
        LoseLock,
        Panic,
    }

    struct ScriptedPipe(Behavior);

    #[async_trait]
    impl ReceivePipe for ScriptedPipe {
        async fn process(&self, context: &ReceiveContext) -> Result<(), PipelineError> {
            match self.0 {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(PipelineError::consumer_failed("scripted", "boom")),
                Behavior::LoseLock => Err(MessagingError::lock_lost(
                    LockLostKind::Message,
                    context.message_id().to_string(),
                )
                .into()),
                Behavior::Panic => panic!("pipe exploded"),
            }
        }
    }

    #[derive(Default)]
    struct FaultCounter {
        faults: AtomicUsize,
        completed: AtomicUsize,
    }

    #[async_trait]
    impl ReceiveObserver for FaultCounter {
        async fn post_receive(&self, _context: &ReceiveContext) -> ObserverResult<()> {
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn receive_fault(
            &self,
            _context: &ReceiveContext,
            _fault: &DispatchError,
        ) -> ObserverResult<()> {
            self.faults.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher(behavior: Behavior) -> ReceivePipeDispatcher {
        ReceivePipeDispatcher::new(
            "test",
            Arc::new(ScriptedPipe(behavior)),
            Arc::new(ObserverRegistry::new()),
            &DispatchConfig::default(),
        )
    }

    fn context(dispatcher: &ReceivePipeDispatcher) -> ReceiveContext {
        ReceiveContext::new(
            ReceivedMessage::new("ping", json!({})),
            Arc::clone(dispatcher.observers()),
        )
    }

    fn lock() -> (Arc<InMemoryTransportLock>, Arc<LockContext>) {
        let transport = Arc::new(InMemoryTransportLock::new("m"));
        let lock = Arc::new(LockContext::new("m", transport.clone()));
        (transport, lock)
    }

    #[tokio::test]
    async fn test_success_completes_lock() {
        let dispatcher = dispatcher(Behavior::Succeed);
        let (transport, lock) = lock();

        let outcome = dispatcher
            .dispatch(context(&dispatcher), Some(lock.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.lock, Some(LockOutcome::Completed));
        assert_eq!(lock.state(), LockState::Completed);
        assert_eq!(transport.complete_calls(), 1);
        assert_eq!(transport.abandon_calls(), 0);
        assert_eq!(dispatcher.active_dispatch_count(), 0);
        assert_eq!(dispatcher.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn test_fault_abandons_lock_and_notifies() {
        let dispatcher = dispatcher(Behavior::Fail);
        let observer = Arc::new(FaultCounter::default());
        let _handle = dispatcher.connect_receive_observer(observer.clone());
        let (transport, lock) = lock();

        let err = dispatcher
            .dispatch(context(&dispatcher), Some(lock))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Faulted { .. }));
        assert_eq!(transport.abandon_calls(), 1);
        assert_eq!(transport.complete_calls(), 0);
        assert_eq!(observer.faults.load(Ordering::SeqCst), 1);
        assert_eq!(observer.completed.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.metrics().faulted_count, 1);
    }

    #[tokio::test]
    async fn test_lock_lost_is_reraised_without_touching_lock() {
        let dispatcher = dispatcher(Behavior::LoseLock);
        let (transport, lock) = lock();

        let err = dispatcher
            .dispatch(context(&dispatcher), Some(lock.clone()))
            .await
            .unwrap_err();

        assert!(err.is_lock_lost());
        assert_eq!(lock.state(), LockState::Lost);
        assert_eq!(transport.complete_calls(), 0);
        assert_eq!(transport.abandon_calls(), 0);
        assert_eq!(dispatcher.metrics().lock_lost_count, 1);
    }

    #[tokio::test]
    async fn test_panicking_pipe_is_contained() {
        let dispatcher = dispatcher(Behavior::Panic);
        let err = dispatcher
            .dispatch(context(&dispatcher), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Faulted {
                source: PipelineError::Panicked { .. },
                ..
            }
        ));
        assert_eq!(dispatcher.active_dispatch_count(), 0);
    }

    #[tokio::test]
    async fn test_context_disposed_before_return() {
        let dispatcher = dispatcher(Behavior::Succeed);
        let ctx = context(&dispatcher);
        let disposed = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&disposed);
        ctx.register_dispose(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(ctx, None).await.unwrap();
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drain_returns_immediately_when_idle() {
        let dispatcher = dispatcher(Behavior::Succeed);
        assert!(dispatcher.drain(Duration::from_millis(5)).await.is_ok());
    }
}
