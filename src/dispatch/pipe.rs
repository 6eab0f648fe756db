//! # Receive Pipe
//!
//! The processing chain a dispatcher runs for each message, and the error
//! type every stage of it reports.

use async_trait::async_trait;
use thiserror::Error;

use crate::messaging::{MessagingError, ReceiveContext};
use crate::orchestration::{AggregateFault, PlanFault};

/// Fault raised by a receive pipe stage
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("No consumer registered for message type {message_type}")]
    NoConsumer { message_type: String },

    #[error("Consumer {consumer} failed: {message}")]
    ConsumerFailed { consumer: String, message: String },

    #[error("Stage {stage} panicked")]
    Panicked { stage: String },

    #[error("Processing cancelled")]
    Cancelled,

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Plan(#[from] PlanFault),

    #[error(transparent)]
    Aggregate(#[from] AggregateFault),
}

impl PipelineError {
    pub fn no_consumer(message_type: impl Into<String>) -> Self {
        Self::NoConsumer {
            message_type: message_type.into(),
        }
    }

    pub fn consumer_failed(consumer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConsumerFailed {
            consumer: consumer.into(),
            message: message.into(),
        }
    }

    pub fn panicked(stage: impl Into<String>) -> Self {
        Self::Panicked {
            stage: stage.into(),
        }
    }

    /// True when the broker lock behind the message is gone
    pub fn is_lock_lost(&self) -> bool {
        match self {
            Self::Messaging(err) => err.is_lock_lost(),
            _ => false,
        }
    }

    /// The transport error behind a lock-lost fault
    pub fn lock_lost_source(&self) -> Option<&MessagingError> {
        match self {
            Self::Messaging(err) if err.is_lock_lost() => Some(err),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Aggregate(fault) => fault.is_cancelled(),
            _ => false,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// A stage chain that processes one receive context
#[async_trait]
pub trait ReceivePipe: Send + Sync + 'static {
    async fn process(&self, context: &ReceiveContext) -> PipelineResult<()>;

    /// Name used in logs and panic reports
    fn name(&self) -> &str {
        "receive_pipe"
    }
}
