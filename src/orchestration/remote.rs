//! # Remote Activities
//!
//! Activities that run out of process through a request/response round trip.
//! [`RequestClient`] is the transport seam; [`InMemoryRequestRouter`] answers
//! requests in process with per-request `oneshot` replies.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::activity::{Activity, ActivityContext};
use super::errors::ActivityResult;
use crate::config::ExecutorConfig;
use crate::messaging::{MessagingError, MessagingResult, OutboundMessage, ReceivedMessage};
use crate::observers::ObserverRegistry;

/// Sends a request and waits for its correlated response
#[async_trait]
pub trait RequestClient: Send + Sync + 'static {
    async fn request(
        &self,
        request: OutboundMessage,
        timeout: Duration,
    ) -> MessagingResult<ReceivedMessage>;
}

/// Activity that forwards the sub-task to a remote service
pub struct RemoteActivity {
    name: String,
    destination: String,
    request_type: String,
    client: Arc<dyn RequestClient>,
    timeout: Duration,
}

impl RemoteActivity {
    pub fn new(
        name: impl Into<String>,
        destination: impl Into<String>,
        client: Arc<dyn RequestClient>,
        timeout: Duration,
    ) -> Self {
        let name = name.into();
        Self {
            request_type: name.clone(),
            name,
            destination: destination.into(),
            client,
            timeout,
        }
    }

    /// Remote activity bounded by `executor.remote_request_timeout_ms`
    pub fn from_config(
        name: impl Into<String>,
        destination: impl Into<String>,
        client: Arc<dyn RequestClient>,
        config: &ExecutorConfig,
    ) -> Self {
        Self::new(name, destination, client, config.remote_request_timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Message type of the outgoing request; defaults to the activity name
    pub fn with_request_type(mut self, request_type: impl Into<String>) -> Self {
        self.request_type = request_type.into();
        self
    }
}

impl std::fmt::Debug for RemoteActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteActivity")
            .field("name", &self.name)
            .field("destination", &self.destination)
            .field("request_type", &self.request_type)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl Activity for RemoteActivity {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &ActivityContext) -> ActivityResult {
        let request = OutboundMessage::new(&self.destination, &self.request_type, context.merged())
            .with_correlation_id(context.correlation_id())
            .with_header("sub_task_id", Value::String(context.sub_task_id().to_string()))
            .with_header("attempt", Value::from(context.attempt()));

        let response = self.client.request(request, self.timeout).await?;
        Ok(response.body)
    }
}

type RequestHandlerFn =
    Arc<dyn Fn(OutboundMessage) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// In-process responder keyed by destination
#[derive(Default)]
pub struct InMemoryRequestRouter {
    handlers: DashMap<String, RequestHandlerFn>,
    observers: Option<Arc<ObserverRegistry>>,
}

impl std::fmt::Debug for InMemoryRequestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let destinations: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("InMemoryRequestRouter")
            .field("destinations", &destinations)
            .finish()
    }
}

impl InMemoryRequestRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify send observers for every request
    pub fn with_observers(mut self, observers: Arc<ObserverRegistry>) -> Self {
        self.observers = Some(observers);
        self
    }

    /// Answer requests sent to `destination`; `Err` replies reject the request
    pub fn route<F, Fut>(&self, destination: impl Into<String>, handler: F)
    where
        F: Fn(OutboundMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handler: RequestHandlerFn = Arc::new(move |request| handler(request).boxed());
        self.handlers.insert(destination.into(), handler);
    }

    async fn dispatch(
        &self,
        request: &OutboundMessage,
        timeout: Duration,
    ) -> MessagingResult<ReceivedMessage> {
        let handler = self
            .handlers
            .get(&request.destination)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| MessagingError::endpoint_unavailable(request.destination.clone()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let call = handler(request.clone());
        tokio::spawn(async move {
            let reply = AssertUnwindSafe(call)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err("responder panicked".to_string()));
            // The requester may have timed out and gone away.
            let _ = reply_tx.send(reply);
        });

        let reply = match tokio::time::timeout(timeout, reply_rx).await {
            Err(_) => {
                return Err(MessagingError::request_timeout(
                    request.destination.clone(),
                    timeout.as_millis() as u64,
                ))
            }
            Ok(Err(_)) => {
                return Err(MessagingError::request_rejected(
                    request.destination.clone(),
                    "responder dropped the request",
                ))
            }
            Ok(Ok(reply)) => reply,
        };

        match reply {
            Ok(body) => {
                let mut response =
                    ReceivedMessage::new(format!("{}_response", request.message_type), body)
                        .with_correlation_id(
                            request.correlation_id.unwrap_or(request.message_id),
                        );
                response.headers = request.headers.clone();
                Ok(response)
            }
            Err(reason) => Err(MessagingError::request_rejected(
                request.destination.clone(),
                reason,
            )),
        }
    }
}

#[async_trait]
impl RequestClient for InMemoryRequestRouter {
    async fn request(
        &self,
        request: OutboundMessage,
        timeout: Duration,
    ) -> MessagingResult<ReceivedMessage> {
        if let Some(observers) = &self.observers {
            observers.pre_send(&request).await;
        }

        let result = self.dispatch(&request, timeout).await;

        match (&result, &self.observers) {
            (Ok(_), Some(observers)) => observers.post_send(&request).await,
            (Err(err), Some(observers)) => observers.send_fault(&request, err).await,
            _ => {}
        }

        match &result {
            Ok(_) => debug!(
                destination = %request.destination,
                message_type = %request.message_type,
                "Remote request answered"
            ),
            Err(err) => warn!(
                destination = %request.destination,
                message_type = %request.message_type,
                error = %err,
                "Remote request failed"
            ),
        }
        result
    }
}
