#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Relay Core
//!
//! In-process core of a message-oriented middleware: receive dispatch with
//! delivery locks, observer hooks and fork-join execution of sub-tasks.
//!
//! ## Overview
//!
//! A transport hands each inbound message to a [`MessageReceiver`]. The
//! receiver wraps it in a [`ReceiveContext`] and a [`LockContext`] and passes
//! it through a [`ReceivePipeDispatcher`], which counts active dispatches,
//! signals zero activity, completes or abandons the lock and always disposes
//! the context. Consumers that need to fan work out create an
//! [`ExecutePlanContext`], push sub-tasks into it, run each one through a
//! [`PlanExecutor`] and await the aggregate.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Message model, delivery locks, receive contexts, endpoints
//! - [`dispatch`] - Receive pipe dispatcher, consume pipe, receiver loop, counters
//! - [`observers`] - Receive, consume, send and publish observers
//! - [`orchestration`] - Itinerary planners, activities, plan executor, fork-join aggregation
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay_core::{ConsumePipe, MessageReceiver, ReceivedMessage, RelayConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> relay_core::Result<()> {
//! let config = RelayConfig::default();
//! let pipe = Arc::new(ConsumePipe::new());
//! let receiver = MessageReceiver::new("orders", pipe, &config);
//!
//! let message = ReceivedMessage::new("order_placed", serde_json::json!({"order_id": 1}));
//! let _ = receiver.handle(message, None, None).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod observers;
pub mod orchestration;

pub use config::{ConfigManager, ConfigurationError, RelayConfig};
pub use dispatch::{
    ConsumeContext, ConsumePipe, Consumer, DeliveryMetrics, DispatchError, DispatchOutcome,
    InboundDelivery, MessageReceiver, PipelineError, ReceivePipe, ReceivePipeDispatcher,
    ZeroActivity,
};
pub use error::{RelayError, Result};
pub use messaging::{
    LockContext, LockOutcome, LockState, MessagingError, OutboundMessage, ReceiveContext,
    ReceivedMessage, TransportLock,
};
pub use observers::{ConnectHandle, ObserverRegistry};
pub use orchestration::{
    Activity, ActivityContext, AggregateFault, AggregateResult, ExecutePlanContext, Itinerary,
    ItineraryPlanner, PlanExecutor, PlanExecutorFactory, PlanFault, PlanRegistry, SlotHandle,
    SubTask,
};
