//! # Consume Pipe
//!
//! Routes a received message to the [`Consumer`] registered for its message
//! type, wrapping the call with consume observer notifications.
//!
//! ```text
//! ReceiveContext ──► ConsumePipe ──► lookup(message_type) ──► Consumer::consume
//!                                         │ none                    │
//!                                         ▼                         ▼
//!                              PipelineError::NoConsumer   pre/post/fault observers
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::pipe::{PipelineError, PipelineResult, ReceivePipe};
use crate::config::{ConfigResult, ConfigurationError, ForkJoinConfig};
use crate::messaging::{
    MessagingError, ObservedPublishEndpoint, ObservedSendEndpoint, OutboundMessage,
    ReceiveContext, ReceivedMessage, SendEndpoint,
};
use crate::orchestration::ExecutePlanContext;

/// Handles one message type
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    async fn consume(&self, context: &ConsumeContext<'_>) -> PipelineResult<()>;

    fn name(&self) -> &str {
        "consumer"
    }
}

/// View of a receive context handed to a consumer
pub struct ConsumeContext<'a> {
    receive: &'a ReceiveContext,
    consumer: &'a str,
    responder: Option<ObservedSendEndpoint>,
    publisher: Option<ObservedPublishEndpoint>,
    fork_join: Option<&'a ForkJoinConfig>,
}

impl<'a> ConsumeContext<'a> {
    pub fn new(receive: &'a ReceiveContext, consumer: &'a str) -> Self {
        Self {
            receive,
            consumer,
            responder: None,
            publisher: None,
            fork_join: None,
        }
    }

    /// Defaults applied to plan contexts opened by the consumer
    pub fn with_fork_join(mut self, config: &'a ForkJoinConfig) -> Self {
        self.fork_join = Some(config);
        self
    }

    pub fn with_responder(mut self, responder: ObservedSendEndpoint) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_publisher(mut self, publisher: ObservedPublishEndpoint) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn receive_context(&self) -> &'a ReceiveContext {
        self.receive
    }

    pub fn message(&self) -> &'a ReceivedMessage {
        self.receive.message()
    }

    pub fn message_id(&self) -> Uuid {
        self.receive.message_id()
    }

    pub fn message_type(&self) -> &'a str {
        self.receive.message_type()
    }

    pub fn correlation_id(&self) -> Uuid {
        self.receive.correlation_id()
    }

    pub fn consumer_name(&self) -> &'a str {
        self.consumer
    }

    pub fn cancellation_token(&self) -> &'a CancellationToken {
        self.receive.cancellation_token()
    }

    /// Deserialize the message body
    pub fn body<T: DeserializeOwned>(&self) -> PipelineResult<T> {
        Ok(self.receive.message().deserialize_body()?)
    }

    /// Fork-join context bound to this message's correlation id and
    /// cancellation. An explicit time-to-live wins over the configured default.
    pub fn plan_context(&self, time_to_live: Option<Duration>) -> ExecutePlanContext {
        let mut builder = ExecutePlanContext::receive_builder(self.receive);
        if let Some(ttl) = time_to_live {
            builder = builder.time_to_live(ttl);
        }
        if let Some(config) = self.fork_join {
            builder = builder.with_config(config);
        }
        builder.build()
    }

    /// Send a reply to the message's response address
    pub async fn respond<T: Serialize>(
        &self,
        message_type: &str,
        body: &T,
    ) -> PipelineResult<OutboundMessage> {
        let destination = self
            .message()
            .response_address
            .clone()
            .ok_or_else(|| {
                PipelineError::consumer_failed(self.consumer, "message has no response address")
            })?;
        let responder = self.responder.as_ref().ok_or_else(|| {
            MessagingError::endpoint_unavailable(destination.clone())
        })?;

        let outbound = self.outbound(destination, message_type, body)?;
        responder.send(&outbound).await?;
        Ok(outbound)
    }

    /// Publish an event correlated with the message being consumed
    pub async fn publish<T: Serialize>(
        &self,
        destination: &str,
        message_type: &str,
        body: &T,
    ) -> PipelineResult<OutboundMessage> {
        let publisher = self
            .publisher
            .as_ref()
            .ok_or_else(|| MessagingError::endpoint_unavailable(destination))?;

        let outbound = self.outbound(destination.to_string(), message_type, body)?;
        publisher.publish(&outbound).await?;
        Ok(outbound)
    }

    fn outbound<T: Serialize>(
        &self,
        destination: String,
        message_type: &str,
        body: &T,
    ) -> PipelineResult<OutboundMessage> {
        let body = serde_json::to_value(body).map_err(MessagingError::from)?;
        Ok(OutboundMessage::new(destination, message_type, body)
            .with_correlation_id(self.correlation_id()))
    }
}

impl std::fmt::Debug for ConsumeContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumeContext")
            .field("message_id", &self.message_id())
            .field("message_type", &self.message_type())
            .field("consumer", &self.consumer)
            .finish()
    }
}

/// Receive pipe that dispatches by message type
#[derive(Default)]
pub struct ConsumePipe {
    consumers: DashMap<String, Arc<dyn Consumer>>,
    send_endpoint: Option<Arc<dyn SendEndpoint>>,
    publish_endpoint: Option<Arc<dyn SendEndpoint>>,
    fork_join: ForkJoinConfig,
}

impl std::fmt::Debug for ConsumePipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumePipe")
            .field("consumers", &self.consumer_types())
            .field("has_send_endpoint", &self.send_endpoint.is_some())
            .field("has_publish_endpoint", &self.publish_endpoint.is_some())
            .field("fork_join", &self.fork_join)
            .finish()
    }
}

impl ConsumePipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint used for `respond`
    pub fn with_send_endpoint(mut self, endpoint: Arc<dyn SendEndpoint>) -> Self {
        self.send_endpoint = Some(endpoint);
        self
    }

    /// Fork-join defaults handed to every consumer's plan contexts
    pub fn with_fork_join_config(mut self, config: ForkJoinConfig) -> Self {
        self.fork_join = config;
        self
    }

    /// Endpoint used for `publish`
    pub fn with_publish_endpoint(mut self, endpoint: Arc<dyn SendEndpoint>) -> Self {
        self.publish_endpoint = Some(endpoint);
        self
    }

    /// Register the consumer for a message type. One consumer per type.
    pub fn register(
        &self,
        message_type: impl Into<String>,
        consumer: Arc<dyn Consumer>,
    ) -> ConfigResult<()> {
        let message_type = message_type.into();
        match self.consumers.entry(message_type.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(
                ConfigurationError::duplicate_registration("consumer", message_type),
            ),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                debug!(message_type = %message_type, consumer = consumer.name(), "Consumer registered");
                entry.insert(consumer);
                Ok(())
            }
        }
    }

    pub fn consumer_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.consumers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    fn consumer_for(&self, message_type: &str) -> Option<Arc<dyn Consumer>> {
        self.consumers.get(message_type).map(|e| Arc::clone(e.value()))
    }
}

#[async_trait]
impl ReceivePipe for ConsumePipe {
    async fn process(&self, context: &ReceiveContext) -> PipelineResult<()> {
        let consumer = self
            .consumer_for(context.message_type())
            .ok_or_else(|| PipelineError::no_consumer(context.message_type()))?;

        if context.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let observers = Arc::clone(context.observers());
        let mut consume =
            ConsumeContext::new(context, consumer.name()).with_fork_join(&self.fork_join);
        if let Some(endpoint) = &self.send_endpoint {
            consume = consume.with_responder(ObservedSendEndpoint::new(
                Arc::clone(endpoint),
                Arc::clone(&observers),
            ));
        }
        if let Some(endpoint) = &self.publish_endpoint {
            consume = consume.with_publisher(ObservedPublishEndpoint::new(
                Arc::clone(endpoint),
                Arc::clone(&observers),
            ));
        }

        observers.pre_consume(&consume).await;

        let result = match AssertUnwindSafe(consumer.consume(&consume))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    message_id = %context.message_id(),
                    consumer = consumer.name(),
                    "Consumer panicked"
                );
                Err(PipelineError::panicked(consumer.name()))
            }
        };

        match &result {
            Ok(()) => observers.post_consume(&consume).await,
            Err(fault) => observers.consume_fault(&consume, fault).await,
        }

        result
    }

    fn name(&self) -> &str {
        "consume_pipe"
    }
}
