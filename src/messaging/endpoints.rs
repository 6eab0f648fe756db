//! # Outbound Endpoints
//!
//! [`SendEndpoint`] is the transport seam for outbound traffic. The observed
//! wrappers add send / publish observer notifications around any endpoint, so
//! observers see every message leaving the process regardless of transport.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::errors::{MessagingError, MessagingResult};
use super::message::OutboundMessage;
use crate::observers::ObserverRegistry;

/// Transport sink for outbound messages
#[async_trait]
pub trait SendEndpoint: Send + Sync + 'static {
    async fn send(&self, message: &OutboundMessage) -> MessagingResult<()>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// Send endpoint that notifies send observers
#[derive(Clone)]
pub struct ObservedSendEndpoint {
    inner: Arc<dyn SendEndpoint>,
    observers: Arc<ObserverRegistry>,
}

impl ObservedSendEndpoint {
    pub fn new(inner: Arc<dyn SendEndpoint>, observers: Arc<ObserverRegistry>) -> Self {
        Self { inner, observers }
    }

    pub async fn send(&self, message: &OutboundMessage) -> MessagingResult<()> {
        self.observers.pre_send(message).await;
        match self.inner.send(message).await {
            Ok(()) => {
                self.observers.post_send(message).await;
                Ok(())
            }
            Err(err) => {
                self.observers.send_fault(message, &err).await;
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for ObservedSendEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedSendEndpoint")
            .field("provider", &self.inner.provider_name())
            .finish()
    }
}

/// Publish endpoint that notifies publish observers
#[derive(Clone)]
pub struct ObservedPublishEndpoint {
    inner: Arc<dyn SendEndpoint>,
    observers: Arc<ObserverRegistry>,
}

impl ObservedPublishEndpoint {
    pub fn new(inner: Arc<dyn SendEndpoint>, observers: Arc<ObserverRegistry>) -> Self {
        Self { inner, observers }
    }

    pub async fn publish(&self, message: &OutboundMessage) -> MessagingResult<()> {
        self.observers.pre_publish(message).await;
        match self.inner.send(message).await {
            Ok(()) => {
                self.observers.post_publish(message).await;
                Ok(())
            }
            Err(err) => {
                self.observers.publish_fault(message, &err).await;
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for ObservedPublishEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedPublishEndpoint")
            .field("provider", &self.inner.provider_name())
            .finish()
    }
}

/// Channel-backed endpoint capturing outbound messages in process
#[derive(Debug)]
pub struct InMemoryEndpoint {
    sender: mpsc::UnboundedSender<OutboundMessage>,
    unavailable: AtomicBool,
    sent: AtomicU64,
}

impl InMemoryEndpoint {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                unavailable: AtomicBool::new(false),
                sent: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Make every subsequent send fail with `EndpointUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SendEndpoint for InMemoryEndpoint {
    async fn send(&self, message: &OutboundMessage) -> MessagingResult<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(MessagingError::endpoint_unavailable(
                message.destination.clone(),
            ));
        }
        self.sender
            .send(message.clone())
            .map_err(|_| MessagingError::endpoint_unavailable(message.destination.clone()))?;
        self.sent.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
