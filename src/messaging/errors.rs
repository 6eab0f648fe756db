//! # Messaging Error Types
//!
//! Structured errors for the transport boundary: delivery locks, outbound
//! endpoints and request/response round trips.

use thiserror::Error;

/// Which broker-side lock expired before processing finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockLostKind {
    /// The per-message delivery lock expired
    Message,
    /// The session lock that owned the message expired
    Session,
}

impl std::fmt::Display for LockLostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockLostKind::Message => write!(f, "message"),
            LockLostKind::Session => write!(f, "session"),
        }
    }
}

/// Comprehensive messaging error types
#[derive(Error, Debug, Clone)]
pub enum MessagingError {
    #[error("Delivery {kind} lock lost for message {message_id}")]
    LockLost {
        kind: LockLostKind,
        message_id: String,
    },

    #[error("Delivery lock already resolved for message {message_id}: {state}")]
    LockResolved { message_id: String, state: String },

    #[error("Lock renewal is not supported by transport {transport}")]
    RenewalNotSupported { transport: String },

    #[error("Transport operation failed: {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("Endpoint unavailable: {destination}")]
    EndpointUnavailable { destination: String },

    #[error("Request to {destination} timed out after {timeout_ms}ms")]
    RequestTimeout { destination: String, timeout_ms: u64 },

    #[error("Request to {destination} was rejected: {message}")]
    RequestRejected { destination: String, message: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a lock lost error
    pub fn lock_lost(kind: LockLostKind, message_id: impl Into<String>) -> Self {
        Self::LockLost {
            kind,
            message_id: message_id.into(),
        }
    }

    /// Create a lock already resolved error
    pub fn lock_resolved(message_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self::LockResolved {
            message_id: message_id.into(),
            state: state.into(),
        }
    }

    /// Create a transport operation error
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an endpoint unavailable error
    pub fn endpoint_unavailable(destination: impl Into<String>) -> Self {
        Self::EndpointUnavailable {
            destination: destination.into(),
        }
    }

    /// Create a request timeout error
    pub fn request_timeout(destination: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            destination: destination.into(),
            timeout_ms,
        }
    }

    /// Create a request rejected error
    pub fn request_rejected(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RequestRejected {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create a message serialization error
    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Lock-lost class: the broker may already be redelivering the message.
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, MessagingError::LockLost { .. })
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
