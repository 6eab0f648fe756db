//! # Messaging Module
//!
//! Transport-neutral message model, delivery locks, receive contexts and
//! outbound endpoints. Transport adapters plug in at [`TransportLock`] and
//! [`SendEndpoint`]; everything above them is broker agnostic.

pub mod endpoints;
pub mod errors;
pub mod lock;
pub mod message;
pub mod receive_context;

pub use endpoints::{InMemoryEndpoint, ObservedPublishEndpoint, ObservedSendEndpoint, SendEndpoint};
pub use errors::{LockLostKind, MessagingError, MessagingResult};
pub use lock::{
    InMemoryTransportLock, LockCapabilities, LockContext, LockOutcome, LockState, TransportLock,
};
pub use message::{OutboundMessage, ReceivedMessage};
pub use receive_context::ReceiveContext;
