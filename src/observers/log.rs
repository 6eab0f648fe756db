//! # Logging Observer
//!
//! Writes every receive, consume, send and publish lifecycle event through
//! `tracing`. Attached automatically when `observers.log_events` is enabled.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::traits::{
    ConsumeObserver, ObserverResult, PublishObserver, ReceiveObserver, SendObserver,
};
use crate::dispatch::{ConsumeContext, DispatchError, PipelineError};
use crate::messaging::{MessagingError, OutboundMessage, ReceiveContext};

#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

#[async_trait]
impl ReceiveObserver for LogObserver {
    async fn pre_receive(&self, context: &ReceiveContext) -> ObserverResult<()> {
        debug!(
            message_id = %context.message_id(),
            message_type = %context.message_type(),
            "📥 Message received"
        );
        Ok(())
    }

    async fn post_receive(&self, context: &ReceiveContext) -> ObserverResult<()> {
        info!(
            message_id = %context.message_id(),
            message_type = %context.message_type(),
            elapsed_ms = context.elapsed().as_millis() as u64,
            "✅ Message processed"
        );
        Ok(())
    }

    async fn receive_fault(
        &self,
        context: &ReceiveContext,
        fault: &DispatchError,
    ) -> ObserverResult<()> {
        warn!(
            message_id = %context.message_id(),
            message_type = %context.message_type(),
            lock_lost = fault.is_lock_lost(),
            error = %fault,
            "❌ Message faulted"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[async_trait]
impl ConsumeObserver for LogObserver {
    async fn pre_consume(&self, context: &ConsumeContext<'_>) -> ObserverResult<()> {
        debug!(
            message_id = %context.message_id(),
            message_type = %context.message_type(),
            "Consumer starting"
        );
        Ok(())
    }

    async fn post_consume(&self, context: &ConsumeContext<'_>) -> ObserverResult<()> {
        debug!(
            message_id = %context.message_id(),
            message_type = %context.message_type(),
            "Consumer completed"
        );
        Ok(())
    }

    async fn consume_fault(
        &self,
        context: &ConsumeContext<'_>,
        fault: &PipelineError,
    ) -> ObserverResult<()> {
        warn!(
            message_id = %context.message_id(),
            message_type = %context.message_type(),
            error = %fault,
            "Consumer faulted"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[async_trait]
impl SendObserver for LogObserver {
    async fn post_send(&self, message: &OutboundMessage) -> ObserverResult<()> {
        debug!(
            message_id = %message.message_id,
            destination = %message.destination,
            message_type = %message.message_type,
            "📤 Message sent"
        );
        Ok(())
    }

    async fn send_fault(
        &self,
        message: &OutboundMessage,
        fault: &MessagingError,
    ) -> ObserverResult<()> {
        warn!(
            message_id = %message.message_id,
            destination = %message.destination,
            error = %fault,
            "Send faulted"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[async_trait]
impl PublishObserver for LogObserver {
    async fn post_publish(&self, message: &OutboundMessage) -> ObserverResult<()> {
        debug!(
            message_id = %message.message_id,
            message_type = %message.message_type,
            "📣 Message published"
        );
        Ok(())
    }

    async fn publish_fault(
        &self,
        message: &OutboundMessage,
        fault: &MessagingError,
    ) -> ObserverResult<()> {
        warn!(
            message_id = %message.message_id,
            message_type = %message.message_type,
            error = %fault,
            "Publish faulted"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
