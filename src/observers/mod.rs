//! # Observers
//!
//! Receive, consume, send and publish observers with runtime attach/detach.
//!
//! ## Architecture
//!
//! ```text
//! ObserverRegistry
//! ├── ObserverSet<dyn ReceiveObserver>   (pre/post/fault per dispatch)
//! ├── ObserverSet<dyn ConsumeObserver>   (per consumer call, optional type filter)
//! ├── ObserverSet<dyn SendObserver>      (outbound send / respond)
//! └── ObserverSet<dyn PublishObserver>   (outbound publish)
//! ```
//!
//! Every `connect_*` call returns a [`ConnectHandle`]; dropping it detaches the
//! observer. Observer failures are logged and counted, never propagated.

pub mod connector;
pub mod log;
pub mod registry;
pub mod traits;

pub use connector::{ConnectHandle, ObserverSet};
pub use log::LogObserver;
pub use registry::ObserverRegistry;
pub use traits::{
    ConsumeObserver, ObserverError, ObserverResult, PublishObserver, ReceiveObserver,
    SendObserver,
};
