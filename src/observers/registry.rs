//! # Observer Registry
//!
//! Fan-out hub for receive, consume, send and publish observers.
//!
//! Notification is sequential and best-effort: every attached observer is
//! called, an observer that returns an error or panics is logged and counted,
//! and the message being observed is never affected.
//!
//! ```text
//! pre_receive(ctx) ──► [observer 1] ──► [observer 2] ──► ... ──► return
//!                          │ Err / panic
//!                          └──► warn!/error! + failure counter
//! ```

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

use super::connector::{ConnectHandle, ObserverSet};
use super::log::LogObserver;
use super::traits::{
    ConsumeObserver, ObserverError, ObserverResult, PublishObserver, ReceiveObserver,
    SendObserver,
};
use crate::config::ObserversConfig;
use crate::dispatch::{ConsumeContext, DispatchError, PipelineError};
use crate::messaging::{MessagingError, OutboundMessage, ReceiveContext};

type NotifyOutcome = Result<ObserverResult<()>, Box<dyn Any + Send>>;

/// Registry of all observer kinds attached to a receive endpoint
pub struct ObserverRegistry {
    receive: ObserverSet<dyn ReceiveObserver>,
    consume: ObserverSet<dyn ConsumeObserver>,
    send: ObserverSet<dyn SendObserver>,
    publish: ObserverSet<dyn PublishObserver>,
    failures: AtomicU64,
    log_attached: AtomicBool,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("receive", &self.receive.count())
            .field("consume", &self.consume.count())
            .field("send", &self.send.count())
            .field("publish", &self.publish.count())
            .field("failures", &self.observer_failures())
            .finish()
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            receive: ObserverSet::new(),
            consume: ObserverSet::new(),
            send: ObserverSet::new(),
            publish: ObserverSet::new(),
            failures: AtomicU64::new(0),
            log_attached: AtomicBool::new(false),
        }
    }

    /// Registry with the tracing observer attached when `log_events` is set
    pub fn from_config(config: &ObserversConfig) -> Self {
        let registry = Self::new();
        if config.log_events {
            registry.attach_log_observer();
        }
        registry
    }

    /// Attach [`LogObserver`] to every observer kind. Only the first call
    /// attaches; returns whether this call did.
    pub fn attach_log_observer(&self) -> bool {
        if self.log_attached.swap(true, Ordering::AcqRel) {
            return false;
        }
        let log = Arc::new(LogObserver);
        self.receive.connect(log.clone()).keep();
        self.consume.connect(log.clone()).keep();
        self.send.connect(log.clone()).keep();
        self.publish.connect(log).keep();
        true
    }

    pub fn connect_receive_observer(&self, observer: Arc<dyn ReceiveObserver>) -> ConnectHandle {
        self.receive.connect(observer)
    }

    pub fn connect_consume_observer(&self, observer: Arc<dyn ConsumeObserver>) -> ConnectHandle {
        self.consume.connect(observer)
    }

    pub fn connect_send_observer(&self, observer: Arc<dyn SendObserver>) -> ConnectHandle {
        self.send.connect(observer)
    }

    pub fn connect_publish_observer(&self, observer: Arc<dyn PublishObserver>) -> ConnectHandle {
        self.publish.connect(observer)
    }

    pub fn receive_observer_count(&self) -> usize {
        self.receive.count()
    }

    pub fn consume_observer_count(&self) -> usize {
        self.consume.count()
    }

    pub fn send_observer_count(&self) -> usize {
        self.send.count()
    }

    pub fn publish_observer_count(&self) -> usize {
        self.publish.count()
    }

    /// Observer errors and panics swallowed since creation
    pub fn observer_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub async fn pre_receive(&self, context: &ReceiveContext) {
        for observer in self.receive.snapshot() {
            let outcome = AssertUnwindSafe(observer.pre_receive(context))
                .catch_unwind()
                .await;
            self.record(observer.name(), "pre_receive", outcome);
        }
    }

    pub async fn post_receive(&self, context: &ReceiveContext) {
        for observer in self.receive.snapshot() {
            let outcome = AssertUnwindSafe(observer.post_receive(context))
                .catch_unwind()
                .await;
            self.record(observer.name(), "post_receive", outcome);
        }
    }

    pub async fn receive_fault(&self, context: &ReceiveContext, fault: &DispatchError) {
        for observer in self.receive.snapshot() {
            let outcome = AssertUnwindSafe(observer.receive_fault(context, fault))
                .catch_unwind()
                .await;
            self.record(observer.name(), "receive_fault", outcome);
        }
    }

    pub async fn pre_consume(&self, context: &ConsumeContext<'_>) {
        for observer in self.consume_observers_for(context.message_type()) {
            let outcome = AssertUnwindSafe(observer.pre_consume(context))
                .catch_unwind()
                .await;
            self.record(observer.name(), "pre_consume", outcome);
        }
    }

    pub async fn post_consume(&self, context: &ConsumeContext<'_>) {
        for observer in self.consume_observers_for(context.message_type()) {
            let outcome = AssertUnwindSafe(observer.post_consume(context))
                .catch_unwind()
                .await;
            self.record(observer.name(), "post_consume", outcome);
        }
    }

    pub async fn consume_fault(&self, context: &ConsumeContext<'_>, fault: &PipelineError) {
        for observer in self.consume_observers_for(context.message_type()) {
            let outcome = AssertUnwindSafe(observer.consume_fault(context, fault))
                .catch_unwind()
                .await;
            self.record(observer.name(), "consume_fault", outcome);
        }
    }

    pub async fn pre_send(&self, message: &OutboundMessage) {
        for observer in self.send.snapshot() {
            let outcome = AssertUnwindSafe(observer.pre_send(message))
                .catch_unwind()
                .await;
            self.record(observer.name(), "pre_send", outcome);
        }
    }

    pub async fn post_send(&self, message: &OutboundMessage) {
        for observer in self.send.snapshot() {
            let outcome = AssertUnwindSafe(observer.post_send(message))
                .catch_unwind()
                .await;
            self.record(observer.name(), "post_send", outcome);
        }
    }

    pub async fn send_fault(&self, message: &OutboundMessage, fault: &MessagingError) {
        for observer in self.send.snapshot() {
            let outcome = AssertUnwindSafe(observer.send_fault(message, fault))
                .catch_unwind()
                .await;
            self.record(observer.name(), "send_fault", outcome);
        }
    }

    pub async fn pre_publish(&self, message: &OutboundMessage) {
        for observer in self.publish.snapshot() {
            let outcome = AssertUnwindSafe(observer.pre_publish(message))
                .catch_unwind()
                .await;
            self.record(observer.name(), "pre_publish", outcome);
        }
    }

    pub async fn post_publish(&self, message: &OutboundMessage) {
        for observer in self.publish.snapshot() {
            let outcome = AssertUnwindSafe(observer.post_publish(message))
                .catch_unwind()
                .await;
            self.record(observer.name(), "post_publish", outcome);
        }
    }

    pub async fn publish_fault(&self, message: &OutboundMessage, fault: &MessagingError) {
        for observer in self.publish.snapshot() {
            let outcome = AssertUnwindSafe(observer.publish_fault(message, fault))
                .catch_unwind()
                .await;
            self.record(observer.name(), "publish_fault", outcome);
        }
    }

    fn consume_observers_for(&self, message_type: &str) -> Vec<Arc<dyn ConsumeObserver>> {
        self.consume
            .snapshot()
            .into_iter()
            .filter(|observer| {
                observer
                    .message_type()
                    .map_or(true, |filter| filter == message_type)
            })
            .collect()
    }

    fn record(&self, observer: &str, event: &str, outcome: NotifyOutcome) {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(observer = %observer, event = %event, error = %err, "Observer notification failed");
            }
            Err(panic) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let err = ObserverError::Panicked {
                    observer: observer.to_string(),
                    event: event.to_string(),
                };
                error!(observer = %observer, event = %event, panic = ?panic, error = %err, "Observer panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::ReceivedMessage;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingObserver {
        pre: AtomicUsize,
        post: AtomicUsize,
    }

    #[async_trait]
    impl ReceiveObserver for CountingObserver {
        async fn pre_receive(&self, _context: &ReceiveContext) -> ObserverResult<()> {
            self.pre.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn post_receive(&self, _context: &ReceiveContext) -> ObserverResult<()> {
            self.post.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_log_observer_attaches_once() {
        let registry = ObserverRegistry::from_config(&ObserversConfig { log_events: true });
        assert_eq!(registry.receive_observer_count(), 1);
        assert!(!registry.attach_log_observer());
        assert_eq!(registry.receive_observer_count(), 1);
        assert_eq!(registry.consume_observer_count(), 1);
        assert_eq!(registry.send_observer_count(), 1);
        assert_eq!(registry.publish_observer_count(), 1);

        let quiet = ObserverRegistry::from_config(&ObserversConfig { log_events: false });
        assert_eq!(quiet.receive_observer_count(), 0);
    }

    struct FailingObserver;

    #[async_trait]
    impl ReceiveObserver for FailingObserver {
        async fn pre_receive(&self, _context: &ReceiveContext) -> ObserverResult<()> {
            Err(ObserverError::failed("failing", "nope"))
        }

        async fn post_receive(&self, _context: &ReceiveContext) -> ObserverResult<()> {
            panic!("observer blew up");
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_fan_out_survives_failing_observers() {
        let registry = Arc::new(ObserverRegistry::new());
        let _failing = registry.connect_receive_observer(Arc::new(FailingObserver));
        let counting = Arc::new(CountingObserver::default());
        let _counting = registry.connect_receive_observer(counting.clone());

        let ctx = ReceiveContext::new(ReceivedMessage::new("ping", json!({})), registry.clone());
        registry.pre_receive(&ctx).await;
        registry.post_receive(&ctx).await;

        assert_eq!(counting.pre.load(Ordering::SeqCst), 1);
        assert_eq!(counting.post.load(Ordering::SeqCst), 1);
        assert_eq!(registry.observer_failures(), 2);
    }

    #[tokio::test]
    async fn test_detached_observer_is_not_notified() {
        let registry = Arc::new(ObserverRegistry::new());
        let counting = Arc::new(CountingObserver::default());
        let handle = registry.connect_receive_observer(counting.clone());
        assert_eq!(registry.receive_observer_count(), 1);
        drop(handle);
        assert_eq!(registry.receive_observer_count(), 0);

        let ctx = ReceiveContext::new(ReceivedMessage::new("ping", json!({})), registry.clone());
        registry.pre_receive(&ctx).await;
        assert_eq!(counting.pre.load(Ordering::SeqCst), 0);
    }
}
