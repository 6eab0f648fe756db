//! # Observer Traits
//!
//! Lifecycle hooks for receive, consume, send and publish. Every method has a
//! no-op default so an observer only implements the events it cares about.
//! Errors returned here are logged by the registry and never fail the message.

use async_trait::async_trait;
use thiserror::Error;

use crate::dispatch::{ConsumeContext, DispatchError, PipelineError};
use crate::messaging::{MessagingError, OutboundMessage, ReceiveContext};

/// Failure raised by an observer during notification
#[derive(Error, Debug, Clone)]
pub enum ObserverError {
    #[error("Observer {observer} failed: {message}")]
    Failed { observer: String, message: String },

    #[error("Observer {observer} panicked during {event}")]
    Panicked { observer: String, event: String },
}

impl ObserverError {
    pub fn failed(observer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            observer: observer.into(),
            message: message.into(),
        }
    }
}

pub type ObserverResult<T> = Result<T, ObserverError>;

/// Observes every message entering a receive endpoint
#[async_trait]
pub trait ReceiveObserver: Send + Sync + 'static {
    /// Called before the message enters the pipeline
    async fn pre_receive(&self, _context: &ReceiveContext) -> ObserverResult<()> {
        Ok(())
    }

    /// Called after the pipeline completed successfully
    async fn post_receive(&self, _context: &ReceiveContext) -> ObserverResult<()> {
        Ok(())
    }

    /// Called when the dispatch faulted, was cancelled, or lost its lock
    async fn receive_fault(
        &self,
        _context: &ReceiveContext,
        _fault: &DispatchError,
    ) -> ObserverResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "receive_observer"
    }
}

/// Observes consumer invocations, optionally for a single message type
#[async_trait]
pub trait ConsumeObserver: Send + Sync + 'static {
    async fn pre_consume(&self, _context: &ConsumeContext<'_>) -> ObserverResult<()> {
        Ok(())
    }

    async fn post_consume(&self, _context: &ConsumeContext<'_>) -> ObserverResult<()> {
        Ok(())
    }

    async fn consume_fault(
        &self,
        _context: &ConsumeContext<'_>,
        _fault: &PipelineError,
    ) -> ObserverResult<()> {
        Ok(())
    }

    /// Restrict notifications to one message type; `None` observes all
    fn message_type(&self) -> Option<&str> {
        None
    }

    fn name(&self) -> &str {
        "consume_observer"
    }
}

/// Observes messages sent to a specific destination
#[async_trait]
pub trait SendObserver: Send + Sync + 'static {
    async fn pre_send(&self, _message: &OutboundMessage) -> ObserverResult<()> {
        Ok(())
    }

    async fn post_send(&self, _message: &OutboundMessage) -> ObserverResult<()> {
        Ok(())
    }

    async fn send_fault(
        &self,
        _message: &OutboundMessage,
        _fault: &MessagingError,
    ) -> ObserverResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "send_observer"
    }
}

/// Observes messages published to subscribers
#[async_trait]
pub trait PublishObserver: Send + Sync + 'static {
    async fn pre_publish(&self, _message: &OutboundMessage) -> ObserverResult<()> {
        Ok(())
    }

    async fn post_publish(&self, _message: &OutboundMessage) -> ObserverResult<()> {
        Ok(())
    }

    async fn publish_fault(
        &self,
        _message: &OutboundMessage,
        _fault: &MessagingError,
    ) -> ObserverResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "publish_observer"
    }
}
