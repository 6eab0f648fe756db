//! # Crate Error Types
//!
//! Top-level error that wraps every subsystem error family. Subsystems keep their
//! own `thiserror` enums close to the code that raises them; this type exists for
//! callers that drive several subsystems at once (bootstrap, the demo binary).

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::dispatch::{DispatchError, PipelineError};
use crate::messaging::MessagingError;
use crate::observers::ObserverError;
use crate::orchestration::{AggregateFault, ForkJoinError, PlanFault};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Observer(#[from] ObserverError),

    #[error(transparent)]
    Plan(#[from] PlanFault),

    #[error(transparent)]
    Aggregate(#[from] AggregateFault),

    #[error(transparent)]
    ForkJoin(#[from] ForkJoinError),
}

impl RelayError {
    /// True when the underlying failure means the delivery lock was lost and the
    /// broker may already be redelivering the message.
    pub fn is_lock_lost(&self) -> bool {
        match self {
            RelayError::Messaging(err) => err.is_lock_lost(),
            RelayError::Dispatch(err) => err.is_lock_lost(),
            RelayError::Pipeline(err) => err.is_lock_lost(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
