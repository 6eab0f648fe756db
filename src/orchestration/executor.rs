//! # Plan Executor
//!
//! Runs one sub-task through its itinerary and writes the outcome to its slot.
//!
//! ```text
//! SlotHandle<T> ──► planner.plan(&T) ──► [activity 1] ──► [activity 2] ──► ... ──► R
//!                                             │ fault / timeout / cancel
//!                                             └──► slot.fault(PlanFault), remaining steps skipped
//! ```
//!
//! Executors are stateless with respect to originating requests; everything
//! correlated lives in the plan context behind the handle, so one executor can
//! serve any number of concurrent sub-tasks.

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::activity::{Activity, ActivityContext};
use super::errors::{ActivityError, PlanFault, PlanResult};
use super::itinerary::{ActivityRef, ItineraryPlanner, RetryPolicy, SubTask};
use super::plan_context::SlotHandle;
use super::registry::PlanRegistry;
use crate::config::{ConfigResult, ExecutorConfig};

/// Creates typed executors from a registry, failing fast on missing planners
#[derive(Debug, Clone)]
pub struct PlanExecutorFactory {
    registry: Arc<PlanRegistry>,
    config: ExecutorConfig,
}

impl PlanExecutorFactory {
    pub fn new(registry: Arc<PlanRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<PlanRegistry> {
        &self.registry
    }

    /// Executor for sub-task `T` completing as `R`
    pub fn create_executor<T, R>(&self) -> ConfigResult<PlanExecutor<T, R>>
    where
        T: SubTask,
        R: DeserializeOwned + Send + 'static,
    {
        let planner = self.registry.planner::<T>()?;
        Ok(PlanExecutor {
            planner,
            registry: Arc::clone(&self.registry),
            activity_timeout: self.config.default_activity_timeout(),
            default_retry: RetryPolicy::interval(
                self.config.default_max_attempts,
                self.config.default_retry_interval(),
            ),
            _completion: PhantomData,
        })
    }
}

/// Executes sub-tasks of type `T`, producing completions of type `R`
pub struct PlanExecutor<T: SubTask, R> {
    planner: Arc<dyn ItineraryPlanner<T>>,
    registry: Arc<PlanRegistry>,
    activity_timeout: Duration,
    default_retry: RetryPolicy,
    _completion: PhantomData<fn() -> R>,
}

impl<T: SubTask, R> Clone for PlanExecutor<T, R> {
    fn clone(&self) -> Self {
        Self {
            planner: Arc::clone(&self.planner),
            registry: Arc::clone(&self.registry),
            activity_timeout: self.activity_timeout,
            default_retry: self.default_retry,
            _completion: PhantomData,
        }
    }
}

impl<T: SubTask, R> std::fmt::Debug for PlanExecutor<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("sub_task_type", &T::sub_task_type())
            .field("completion_type", &std::any::type_name::<R>())
            .field("activity_timeout", &self.activity_timeout)
            .finish()
    }
}

struct Step<'a> {
    sub_task_id: Uuid,
    correlation_id: Uuid,
    arguments: &'a Value,
    variables: &'a Map<String, Value>,
    cancellation: &'a CancellationToken,
}

impl<T, R> PlanExecutor<T, R>
where
    T: SubTask,
    R: DeserializeOwned + Send + 'static,
{
    /// Run the sub-task and resolve its slot with the outcome
    pub async fn execute(&self, handle: SlotHandle<T>) -> PlanResult<R> {
        let started = Instant::now();
        let sub_task_id = handle.sub_task_id();

        match self.run(&handle).await {
            Ok((value, completion)) => {
                let accepted = handle.resolve(Ok(value));
                debug!(
                    sub_task_id = %sub_task_id,
                    sub_task_type = T::sub_task_type(),
                    accepted = accepted,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sub-task completed"
                );
                Ok(completion)
            }
            Err(fault) => {
                warn!(
                    sub_task_id = %sub_task_id,
                    sub_task_type = T::sub_task_type(),
                    error = %fault,
                    "Sub-task faulted"
                );
                handle.fault(fault.clone());
                Err(fault)
            }
        }
    }

    /// Run [`execute`](Self::execute) on its own task
    pub fn spawn(&self, handle: SlotHandle<T>) -> JoinHandle<PlanResult<R>> {
        let executor = self.clone();
        tokio::spawn(async move { executor.execute(handle).await })
    }

    async fn run(&self, handle: &SlotHandle<T>) -> PlanResult<(Value, R)> {
        let sub_task_id = handle.sub_task_id();
        let correlation_id = handle.plan_context().correlation_id();
        let cancellation = handle.plan_context().cancellation_token();
        let itinerary = self.planner.plan(handle.sub_task());

        let arguments =
            serde_json::to_value(handle.sub_task()).map_err(|e| PlanFault::Serialization {
                sub_task_id,
                message: e.to_string(),
            })?;
        let mut variables = Map::new();

        for activity_ref in itinerary.activities() {
            if cancellation.is_cancelled() {
                return Err(PlanFault::Cancelled { sub_task_id });
            }

            let activity =
                self.registry
                    .activity(activity_ref.name())
                    .ok_or_else(|| PlanFault::UnknownActivity {
                        sub_task_id,
                        activity: activity_ref.name().to_string(),
                    })?;

            let step = Step {
                sub_task_id,
                correlation_id,
                arguments: &arguments,
                variables: &variables,
                cancellation,
            };
            let output = self.run_activity(activity.as_ref(), activity_ref, step).await?;
            merge(&mut variables, activity_ref.name(), output);
        }

        let mut completion = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        completion.extend(variables);
        let completion = Value::Object(completion);

        let typed = serde_json::from_value::<R>(completion.clone()).map_err(|e| {
            PlanFault::Completion {
                sub_task_id,
                message: e.to_string(),
            }
        })?;
        Ok((completion, typed))
    }

    async fn run_activity(
        &self,
        activity: &dyn Activity,
        activity_ref: &ActivityRef,
        step: Step<'_>,
    ) -> PlanResult<Value> {
        let retry = activity_ref.retry().unwrap_or(self.default_retry);
        let timeout = activity_ref.timeout().unwrap_or(self.activity_timeout);
        let name = activity_ref.name();
        let mut last_fault = None;

        for attempt in 1..=retry.max_attempts.max(1) {
            let context = ActivityContext::new(
                name,
                step.sub_task_id,
                T::sub_task_type(),
                step.correlation_id,
                step.arguments.clone(),
                step.variables.clone(),
                step.cancellation.clone(),
                attempt,
            );

            let attempted = tokio::select! {
                biased;
                _ = step.cancellation.cancelled() => {
                    return Err(PlanFault::Cancelled { sub_task_id: step.sub_task_id });
                }
                attempted = tokio::time::timeout(
                    timeout,
                    AssertUnwindSafe(activity.execute(&context)).catch_unwind(),
                ) => attempted,
            };

            let fault = match attempted {
                Ok(Ok(Ok(output))) => {
                    debug!(
                        sub_task_id = %step.sub_task_id,
                        activity = %name,
                        attempt = attempt,
                        "Activity completed"
                    );
                    return Ok(output);
                }
                Ok(Ok(Err(err))) => PlanFault::ActivityFailed {
                    sub_task_id: step.sub_task_id,
                    activity: name.to_string(),
                    message: describe(&err),
                    attempts: attempt,
                },
                Ok(Err(_panic)) => {
                    return Err(PlanFault::ActivityPanicked {
                        sub_task_id: step.sub_task_id,
                        activity: name.to_string(),
                    });
                }
                Err(_elapsed) => PlanFault::ActivityTimedOut {
                    sub_task_id: step.sub_task_id,
                    activity: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                },
            };

            if attempt < retry.max_attempts {
                warn!(
                    sub_task_id = %step.sub_task_id,
                    activity = %name,
                    attempt = attempt,
                    max_attempts = retry.max_attempts,
                    error = %fault,
                    "🔄 Activity failed, retrying"
                );
                tokio::select! {
                    _ = step.cancellation.cancelled() => {
                        return Err(PlanFault::Cancelled { sub_task_id: step.sub_task_id });
                    }
                    _ = tokio::time::sleep(retry.interval) => {}
                }
            }
            last_fault = Some(fault);
        }

        Err(last_fault.unwrap_or(PlanFault::ActivityFailed {
            sub_task_id: step.sub_task_id,
            activity: name.to_string(),
            message: "no attempts were made".to_string(),
            attempts: 0,
        }))
    }
}

fn describe(err: &ActivityError) -> String {
    match err {
        ActivityError::Failed(message) => message.clone(),
        ActivityError::Remote(err) => format!("remote: {err}"),
    }
}

fn merge(variables: &mut Map<String, Value>, activity: &str, output: Value) {
    match output {
        Value::Object(map) => variables.extend(map),
        Value::Null => {}
        other => {
            variables.insert(activity.to_string(), other);
        }
    }
}
