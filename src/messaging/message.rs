//! # Message Structures
//!
//! Transport-neutral message envelopes. A transport adapter converts its native
//! delivery into a [`ReceivedMessage`]; outbound traffic (send, publish, respond)
//! travels as an [`OutboundMessage`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::errors::MessagingResult;

/// A message delivered by the transport, ready for dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Transport-assigned message identifier
    pub message_id: Uuid,
    /// Conversation correlation, if the sender supplied one
    pub correlation_id: Option<Uuid>,
    /// Logical message type used for consumer routing (e.g. "submit_order")
    pub message_type: String,
    /// Message body
    pub body: serde_json::Value,
    /// Address responses should be sent to
    pub response_address: Option<String>,
    /// Transport and application headers
    pub headers: HashMap<String, serde_json::Value>,
    /// When the broker accepted the message
    pub enqueued_at: DateTime<Utc>,
    /// Number of times the broker has delivered this message
    pub delivery_count: u32,
}

impl ReceivedMessage {
    /// Create a new message with a fresh id
    pub fn new(message_type: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id: None,
            message_type: message_type.into(),
            body,
            response_address: None,
            headers: HashMap::new(),
            enqueued_at: Utc::now(),
            delivery_count: 1,
        }
    }

    /// Build a message from a serializable body
    pub fn from_body<T: Serialize>(
        message_type: impl Into<String>,
        body: &T,
    ) -> MessagingResult<Self> {
        Ok(Self::new(message_type, serde_json::to_value(body)?))
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_response_address(mut self, address: impl Into<String>) -> Self {
        self.response_address = Some(address.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Correlation used for fork-join sessions: explicit correlation id, else the message id
    pub fn effective_correlation_id(&self) -> Uuid {
        self.correlation_id.unwrap_or(self.message_id)
    }

    /// Deserialize the body into a typed message
    pub fn deserialize_body<T: DeserializeOwned>(&self) -> MessagingResult<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Age of the message since the broker accepted it, in milliseconds
    pub fn age_ms(&self) -> u64 {
        Utc::now()
            .signed_duration_since(self.enqueued_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// A message leaving the process through a send or publish endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Message identifier assigned at creation
    pub message_id: Uuid,
    /// Destination address (queue, topic or reply address)
    pub destination: String,
    /// Logical message type
    pub message_type: String,
    /// Message body
    pub body: serde_json::Value,
    /// Conversation correlation carried from the inbound message
    pub correlation_id: Option<Uuid>,
    /// Application headers
    pub headers: HashMap<String, serde_json::Value>,
    /// Creation timestamp
    pub sent_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(
        destination: impl Into<String>,
        message_type: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            destination: destination.into(),
            message_type: message_type.into(),
            body,
            correlation_id: None,
            headers: HashMap::new(),
            sent_at: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Deserialize the body into a typed message
    pub fn deserialize_body<T: DeserializeOwned>(&self) -> MessagingResult<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}
