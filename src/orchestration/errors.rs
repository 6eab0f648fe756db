//! # Orchestration Errors
//!
//! `PlanFault` describes why one sub-task failed and stays at its slot.
//! `AggregateFault` is the single structured failure a fork-join caller sees.
//! `ForkJoinError` covers misuse of the plan context itself.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::messaging::MessagingError;

/// Failure reported by an activity implementation
#[derive(Error, Debug, Clone)]
pub enum ActivityError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Remote(#[from] MessagingError),
}

impl ActivityError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type ActivityResult = Result<serde_json::Value, ActivityError>;

/// Why a single sub-task did not complete
#[derive(Error, Debug, Clone)]
pub enum PlanFault {
    #[error("Activity {activity} failed for sub-task {sub_task_id} after {attempts} attempt(s): {message}")]
    ActivityFailed {
        sub_task_id: Uuid,
        activity: String,
        message: String,
        attempts: u32,
    },

    #[error("Activity {activity} timed out after {timeout_ms}ms for sub-task {sub_task_id}")]
    ActivityTimedOut {
        sub_task_id: Uuid,
        activity: String,
        timeout_ms: u64,
    },

    #[error("Activity {activity} panicked for sub-task {sub_task_id}")]
    ActivityPanicked { sub_task_id: Uuid, activity: String },

    #[error("Itinerary for sub-task {sub_task_id} references unknown activity {activity}")]
    UnknownActivity { sub_task_id: Uuid, activity: String },

    #[error("Sub-task {sub_task_id} was cancelled")]
    Cancelled { sub_task_id: Uuid },

    #[error("Sub-task {sub_task_id} was dropped before producing a result")]
    Abandoned { sub_task_id: Uuid },

    #[error("Sub-task {sub_task_id} could not be serialized: {message}")]
    Serialization { sub_task_id: Uuid, message: String },

    #[error("Sub-task {sub_task_id} completion could not be built: {message}")]
    Completion { sub_task_id: Uuid, message: String },
}

impl PlanFault {
    pub fn sub_task_id(&self) -> Uuid {
        match self {
            Self::ActivityFailed { sub_task_id, .. }
            | Self::ActivityTimedOut { sub_task_id, .. }
            | Self::ActivityPanicked { sub_task_id, .. }
            | Self::UnknownActivity { sub_task_id, .. }
            | Self::Cancelled { sub_task_id }
            | Self::Abandoned { sub_task_id }
            | Self::Serialization { sub_task_id, .. }
            | Self::Completion { sub_task_id, .. } => *sub_task_id,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub type PlanResult<T> = Result<T, PlanFault>;

/// A faulted slot inside an aggregate fault
#[derive(Debug, Clone)]
pub struct SlotFault {
    pub sub_task_id: Uuid,
    pub sub_task_type: String,
    pub fault: PlanFault,
}

/// The fork-join session did not produce a complete result
#[derive(Error, Debug, Clone)]
pub enum AggregateFault {
    /// One or more slots faulted; successful slots are kept for diagnostics
    #[error("Fork-join {correlation_id} faulted: {} of {} sub-task(s) failed", .faults.len(), .faults.len() + .completed.len())]
    Faulted {
        correlation_id: Uuid,
        faults: Vec<SlotFault>,
        completed: HashMap<Uuid, serde_json::Value>,
    },

    /// Slots that faulted before the deadline are kept alongside the results
    #[error("Fork-join {correlation_id} timed out after {}ms with {} sub-task(s) pending", .time_to_live.as_millis(), .pending.len())]
    TimedOut {
        correlation_id: Uuid,
        time_to_live: Duration,
        completed: HashMap<Uuid, serde_json::Value>,
        faults: Vec<SlotFault>,
        pending: Vec<Uuid>,
    },

    #[error("Fork-join {correlation_id} cancelled with {} sub-task(s) pending", .pending.len())]
    Cancelled {
        correlation_id: Uuid,
        completed: HashMap<Uuid, serde_json::Value>,
        faults: Vec<SlotFault>,
        pending: Vec<Uuid>,
    },
}

impl AggregateFault {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            Self::Faulted { correlation_id, .. }
            | Self::TimedOut { correlation_id, .. }
            | Self::Cancelled { correlation_id, .. } => *correlation_id,
        }
    }

    /// Results of the slots that did complete
    pub fn completed(&self) -> &HashMap<Uuid, serde_json::Value> {
        match self {
            Self::Faulted { completed, .. }
            | Self::TimedOut { completed, .. }
            | Self::Cancelled { completed, .. } => completed,
        }
    }

    /// Typed view of one completed slot
    pub fn completed_result<R: serde::de::DeserializeOwned>(
        &self,
        sub_task_id: Uuid,
    ) -> ForkJoinResult<R> {
        let value = self
            .completed()
            .get(&sub_task_id)
            .ok_or(ForkJoinError::UnknownSubTask { sub_task_id })?;
        serde_json::from_value(value.clone()).map_err(|e| ForkJoinError::ResultDeserialization {
            sub_task_id,
            message: e.to_string(),
        })
    }

    /// Slots that faulted before the aggregate was emitted
    pub fn faults(&self) -> &[SlotFault] {
        match self {
            Self::Faulted { faults, .. }
            | Self::TimedOut { faults, .. }
            | Self::Cancelled { faults, .. } => faults,
        }
    }

    /// Sub-tasks still running when the session timed out or was cancelled
    pub fn pending(&self) -> &[Uuid] {
        match self {
            Self::Faulted { .. } => &[],
            Self::TimedOut { pending, .. } | Self::Cancelled { pending, .. } => pending,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Misuse of a plan context
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForkJoinError {
    #[error("Fork-join {correlation_id} is already joining; no more sub-tasks can be pushed")]
    Sealed { correlation_id: Uuid },

    #[error("Sub-task {sub_task_id} was already pushed")]
    DuplicateSubTask { sub_task_id: Uuid },

    #[error("No result for sub-task {sub_task_id}")]
    UnknownSubTask { sub_task_id: Uuid },

    #[error("Result for sub-task {sub_task_id} has an unexpected shape: {message}")]
    ResultDeserialization { sub_task_id: Uuid, message: String },

    #[error("Sub-task could not be serialized: {message}")]
    SubTaskSerialization { message: String },
}

pub type ForkJoinResult<T> = Result<T, ForkJoinError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aggregate_fault_keeps_completed_results() {
        let ok_id = Uuid::new_v4();
        let bad_id = Uuid::new_v4();
        let fault = AggregateFault::Faulted {
            correlation_id: Uuid::new_v4(),
            faults: vec![SlotFault {
                sub_task_id: bad_id,
                sub_task_type: "fry".to_string(),
                fault: PlanFault::Abandoned { sub_task_id: bad_id },
            }],
            completed: HashMap::from([(ok_id, json!({"size": "large"}))]),
        };

        assert_eq!(fault.faults().len(), 1);
        assert_eq!(fault.faults()[0].fault.sub_task_id(), bad_id);
        let value: serde_json::Value = fault.completed_result(ok_id).unwrap();
        assert_eq!(value["size"], "large");
        assert!(matches!(
            fault.completed_result::<serde_json::Value>(bad_id),
            Err(ForkJoinError::UnknownSubTask { .. })
        ));
        assert!(fault.to_string().contains("1 of 2"));
    }
}
