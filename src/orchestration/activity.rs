//! # Activities
//!
//! An activity is one step of an itinerary. It sees the sub-task arguments
//! and the variables produced by earlier steps, and returns an output that is
//! merged into those variables.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::errors::{ActivityError, ActivityResult};

/// Inputs visible to one activity attempt
#[derive(Debug, Clone)]
pub struct ActivityContext {
    activity: String,
    sub_task_id: Uuid,
    sub_task_type: &'static str,
    correlation_id: Uuid,
    arguments: Value,
    variables: Map<String, Value>,
    cancellation: CancellationToken,
    attempt: u32,
}

impl ActivityContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        activity: &str,
        sub_task_id: Uuid,
        sub_task_type: &'static str,
        correlation_id: Uuid,
        arguments: Value,
        variables: Map<String, Value>,
        cancellation: CancellationToken,
        attempt: u32,
    ) -> Self {
        Self {
            activity: activity.to_string(),
            sub_task_id,
            sub_task_type,
            correlation_id,
            arguments,
            variables,
            cancellation,
            attempt,
        }
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    pub fn sub_task_id(&self) -> Uuid {
        self.sub_task_id
    }

    pub fn sub_task_type(&self) -> &'static str {
        self.sub_task_type
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// The serialized sub-task
    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    /// Deserialize the sub-task arguments into `T`
    pub fn arguments_as<T: DeserializeOwned>(&self) -> Result<T, ActivityError> {
        serde_json::from_value(self.arguments.clone())
            .map_err(|e| ActivityError::failed(format!("invalid arguments: {e}")))
    }

    /// Look up one argument field
    pub fn argument<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.arguments
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Look up a variable produced by an earlier activity
    pub fn variable<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.variables
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// 1-based attempt number under the activity's retry policy
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Arguments overlaid with variables, as one JSON object
    pub fn merged(&self) -> Value {
        let mut merged = match &self.arguments {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        merged.extend(self.variables.clone());
        Value::Object(merged)
    }
}

/// One itinerary step
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Output objects are merged into the sub-task variables; `null` adds
    /// nothing and any other value is stored under the activity name
    async fn execute(&self, context: &ActivityContext) -> ActivityResult;
}

/// Activity backed by an async closure
pub struct FnActivity<F> {
    name: String,
    run: F,
}

impl<F, Fut> FnActivity<F>
where
    F: Fn(ActivityContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActivityResult> + Send + 'static,
{
    pub fn new(name: impl Into<String>, run: F) -> Self {
        Self {
            name: name.into(),
            run,
        }
    }
}

#[async_trait]
impl<F, Fut> Activity for FnActivity<F>
where
    F: Fn(ActivityContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActivityResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &ActivityContext) -> ActivityResult {
        (self.run)(context.clone()).await
    }
}

impl<F> std::fmt::Debug for FnActivity<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnActivity").field("name", &self.name).finish()
    }
}

/// Shorthand for [`FnActivity::new`]
pub fn activity_fn<F, Fut>(name: impl Into<String>, run: F) -> FnActivity<F>
where
    F: Fn(ActivityContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActivityResult> + Send + 'static,
{
    FnActivity::new(name, run)
}
