//! # Orchestration Module
//!
//! Fork-join execution of sub-tasks derived from one inbound message.
//!
//! ```text
//! consumer ──► ExecutePlanContext::push(sub_task) ──► SlotHandle
//!                                                        │
//!                          PlanExecutor::execute(handle) ◄┘
//!                              │ planner.plan ─► activities (local or remote)
//!                              ▼
//!                          slot result ──► await_all() ──► AggregateResult | AggregateFault
//! ```
//!
//! Planners and activities are registered explicitly in a [`PlanRegistry`] at
//! startup; [`PlanExecutorFactory`] refuses to build an executor for a sub-task
//! type with no planner.

pub mod activity;
pub mod errors;
pub mod executor;
pub mod itinerary;
pub mod plan_context;
pub mod registry;
pub mod remote;

pub use activity::{activity_fn, Activity, ActivityContext, FnActivity};
pub use errors::{
    ActivityError, ActivityResult, AggregateFault, ForkJoinError, ForkJoinResult, PlanFault,
    PlanResult, SlotFault,
};
pub use executor::{PlanExecutor, PlanExecutorFactory};
pub use itinerary::{ActivityRef, Itinerary, ItineraryPlanner, RetryPolicy, SubTask};
pub use plan_context::{
    AggregateOutcome, AggregateResult, ExecutePlanContext, LateResult, PlanContextBuilder,
    SlotHandle,
};
pub use registry::PlanRegistry;
pub use remote::{InMemoryRequestRouter, RemoteActivity, RequestClient};
