//! # Message Receiver
//!
//! Front door for a receive endpoint. Wraps each delivery in a receive
//! context and lock context, links external cancellation, and hands it to the
//! [`ReceivePipeDispatcher`].
//!
//! [`MessageReceiver::run`] consumes a delivery channel with bounded
//! concurrency, following the semaphore-gated spawn loop used by worker
//! dispatch services:
//!
//! ```text
//! deliveries ──► acquire permit ──► spawn(handle) ──► release permit
//!      │                                   │
//!  shutdown ──────────────────────────► drain(timeout)
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::{DispatchError, DispatchOutcome, DispatchResult, ReceivePipeDispatcher};
use super::metrics::{DeliveryMetrics, ZeroActivity};
use super::pipe::ReceivePipe;
use crate::config::RelayConfig;
use crate::messaging::{LockContext, ReceiveContext, ReceivedMessage, TransportLock};
use crate::observers::{
    ConnectHandle, ConsumeObserver, ObserverRegistry, PublishObserver,
    ReceiveObserver, SendObserver,
};

/// One message handed over by a transport
pub struct InboundDelivery {
    pub message: ReceivedMessage,
    pub lock: Option<Arc<dyn TransportLock>>,
    pub cancellation: Option<CancellationToken>,
}

impl InboundDelivery {
    pub fn new(message: ReceivedMessage) -> Self {
        Self {
            message,
            lock: None,
            cancellation: None,
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn TransportLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

impl std::fmt::Debug for InboundDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundDelivery")
            .field("message_id", &self.message.message_id)
            .field("message_type", &self.message.message_type)
            .field("has_lock", &self.lock.is_some())
            .finish()
    }
}

/// Receive endpoint runtime
pub struct MessageReceiver {
    dispatcher: Arc<ReceivePipeDispatcher>,
    observers: Arc<ObserverRegistry>,
    limiter: Arc<Semaphore>,
    max_concurrent: usize,
    drain_timeout: Duration,
    /// Cancels every in-flight receive context
    in_flight: CancellationToken,
    /// Stops `run` from accepting new deliveries
    shutdown: CancellationToken,
}

impl std::fmt::Debug for MessageReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReceiver")
            .field("dispatcher", &self.dispatcher)
            .field("max_concurrent", &self.max_concurrent)
            .field("available_permits", &self.limiter.available_permits())
            .finish()
    }
}

impl MessageReceiver {
    pub fn new(name: impl Into<String>, pipe: Arc<dyn ReceivePipe>, config: &RelayConfig) -> Self {
        Self::with_observers(
            name,
            pipe,
            Arc::new(ObserverRegistry::from_config(&config.observers)),
            config,
        )
    }

    pub fn with_observers(
        name: impl Into<String>,
        pipe: Arc<dyn ReceivePipe>,
        observers: Arc<ObserverRegistry>,
        config: &RelayConfig,
    ) -> Self {
        if config.observers.log_events {
            observers.attach_log_observer();
        }

        let max_concurrent = config.dispatch.max_concurrent_dispatches.max(1);
        let dispatcher = Arc::new(ReceivePipeDispatcher::new(
            name,
            pipe,
            Arc::clone(&observers),
            &config.dispatch,
        ));

        Self {
            dispatcher,
            observers,
            limiter: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            drain_timeout: config.dispatch.drain_timeout(),
            in_flight: CancellationToken::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Process one message to completion.
    ///
    /// `cancellation` is linked to the receive context for the duration of the
    /// dispatch only; the link is released when the context is disposed.
    pub async fn handle(
        &self,
        message: ReceivedMessage,
        cancellation: Option<CancellationToken>,
        lock: Option<Arc<dyn TransportLock>>,
    ) -> DispatchResult<DispatchOutcome> {
        let token = self.in_flight.child_token();
        let message_id = message.message_id;
        let context =
            ReceiveContext::with_cancellation(message, Arc::clone(&self.observers), token.clone());

        if let Some(external) = cancellation {
            let registration = CancellationToken::new();
            let released = registration.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = external.cancelled() => token.cancel(),
                    _ = released.cancelled() => {}
                }
            });
            context.register_dispose(move || registration.cancel());
        }

        let lock = lock.map(|transport| Arc::new(LockContext::new(message_id.to_string(), transport)));

        self.dispatcher.dispatch(context, lock).await
    }

    /// Consume deliveries until the channel closes or [`stop`](Self::stop) is
    /// called, then wait for in-flight work to drain.
    pub async fn run(self: Arc<Self>, mut deliveries: mpsc::Receiver<InboundDelivery>) -> DispatchResult<()> {
        info!(
            receiver = %self.dispatcher.name(),
            max_concurrent = self.max_concurrent,
            "🚀 Message receiver started"
        );

        loop {
            let delivery = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    Self::release_unprocessed(delivery).await;
                    break;
                }
                permit = Arc::clone(&self.limiter).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Concurrency limiter closed; stopping receiver");
                        Self::release_unprocessed(delivery).await;
                        break;
                    }
                },
            };

            let receiver = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                let InboundDelivery {
                    message,
                    lock,
                    cancellation,
                } = delivery;
                if let Err(err) = receiver.handle(message, cancellation, lock).await {
                    debug!(error = %err, "Delivery finished with fault");
                }
            });
        }

        info!(
            receiver = %self.dispatcher.name(),
            active = self.dispatcher.active_dispatch_count(),
            "🛑 Message receiver stopping, draining in-flight dispatches"
        );

        // Every spawned delivery holds a permit until its dispatch returns,
        // including deliveries that have not reached the dispatcher yet.
        let permits = u32::try_from(self.max_concurrent).unwrap_or(u32::MAX);
        match tokio::time::timeout(self.drain_timeout, self.limiter.acquire_many(permits)).await {
            Ok(_) => {}
            Err(_) => {
                return Err(DispatchError::DrainTimeout {
                    active: self.dispatcher.active_dispatch_count(),
                    timeout_ms: self.drain_timeout.as_millis() as u64,
                });
            }
        }
        self.dispatcher.drain(self.drain_timeout).await
    }

    async fn release_unprocessed(delivery: InboundDelivery) {
        if let Some(lock) = delivery.lock {
            if let Err(err) = lock.abandon().await {
                warn!(message_id = %delivery.message.message_id, error = %err, "Failed to abandon undispatched delivery");
            }
        }
    }

    /// Stop accepting deliveries; in-flight work continues
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Request cooperative cancellation of every in-flight message
    pub fn cancel_in_flight(&self) {
        self.in_flight.cancel();
    }

    pub async fn drain(&self, timeout: Duration) -> DispatchResult<()> {
        self.dispatcher.drain(timeout).await
    }

    pub fn dispatcher(&self) -> &Arc<ReceivePipeDispatcher> {
        &self.dispatcher
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    pub fn active_dispatch_count(&self) -> usize {
        self.dispatcher.active_dispatch_count()
    }

    pub fn dispatch_count(&self) -> u64 {
        self.dispatcher.dispatch_count()
    }

    pub fn max_concurrent_dispatch_count(&self) -> usize {
        self.dispatcher.max_concurrent_dispatch_count()
    }

    pub fn metrics(&self) -> DeliveryMetrics {
        self.dispatcher.metrics()
    }

    pub fn subscribe_zero_activity(&self) -> broadcast::Receiver<ZeroActivity> {
        self.dispatcher.subscribe_zero_activity()
    }

    pub fn connect_receive_observer(&self, observer: Arc<dyn ReceiveObserver>) -> ConnectHandle {
        self.observers.connect_receive_observer(observer)
    }

    pub fn connect_consume_observer(&self, observer: Arc<dyn ConsumeObserver>) -> ConnectHandle {
        self.observers.connect_consume_observer(observer)
    }

    pub fn connect_send_observer(&self, observer: Arc<dyn SendObserver>) -> ConnectHandle {
        self.observers.connect_send_observer(observer)
    }

    pub fn connect_publish_observer(&self, observer: Arc<dyn PublishObserver>) -> ConnectHandle {
        self.observers.connect_publish_observer(observer)
    }
}
