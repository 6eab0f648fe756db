//! # Dispatch Module
//!
//! Receive-side runtime: the receive pipe abstraction, the consume pipe that
//! routes by message type, the dispatcher that owns counters and lock handling,
//! and the receiver that feeds it from a transport.

pub mod consume;
pub mod dispatcher;
pub mod metrics;
pub mod pipe;
pub mod receiver;

pub use consume::{ConsumeContext, ConsumePipe, Consumer};
pub use dispatcher::{
    DispatchError, DispatchOutcome, DispatchResult, DispatchState, ReceivePipeDispatcher,
};
pub use metrics::{ActiveDispatch, DeliveryMetrics, DispatchCounters, ZeroActivity};
pub use pipe::{PipelineError, PipelineResult, ReceivePipe};
pub use receiver::{InboundDelivery, MessageReceiver};
