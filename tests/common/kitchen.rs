//! Restaurant order domain shared by the fork-join and scenario tests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use relay_core::config::ExecutorConfig;
use relay_core::dispatch::{ConsumeContext, Consumer, PipelineError, PipelineResult};
use relay_core::orchestration::{
    activity_fn, ActivityContext, ActivityError, ForkJoinError, Itinerary, ItineraryPlanner,
    PlanExecutor, PlanExecutorFactory, PlanRegistry, SubTask,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fry {
    pub fry_id: Uuid,
    pub size: String,
}

impl Fry {
    pub fn new(size: &str) -> Self {
        Self {
            fry_id: Uuid::new_v4(),
            size: size.to_string(),
        }
    }
}

impl SubTask for Fry {
    fn sub_task_id(&self) -> Uuid {
        self.fry_id
    }

    fn sub_task_type() -> &'static str {
        "fry"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Burger {
    pub burger_id: Uuid,
    pub weight: f64,
    pub cheese: bool,
}

impl Burger {
    pub fn new(weight: f64, cheese: bool) -> Self {
        Self {
            burger_id: Uuid::new_v4(),
            weight,
            cheese,
        }
    }
}

impl SubTask for Burger {
    fn sub_task_id(&self) -> Uuid {
        self.burger_id
    }

    fn sub_task_type() -> &'static str {
        "burger"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shake {
    pub shake_id: Uuid,
    pub flavor: String,
}

impl Shake {
    pub fn new(flavor: &str) -> Self {
        Self {
            shake_id: Uuid::new_v4(),
            flavor: flavor.to_string(),
        }
    }
}

impl SubTask for Shake {
    fn sub_task_id(&self) -> Uuid {
        self.shake_id
    }

    fn sub_task_type() -> &'static str {
        "shake"
    }
}

/// Completion shared by every order line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineReady {
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitOrder {
    pub order_id: Uuid,
    #[serde(default)]
    pub fries: Vec<Fry>,
    #[serde(default)]
    pub burgers: Vec<Burger>,
    #[serde(default)]
    pub shakes: Vec<Shake>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: Uuid,
    pub lines: Vec<(Uuid, String)>,
}

pub struct FryPlanner;

impl ItineraryPlanner<Fry> for FryPlanner {
    fn plan(&self, _fry: &Fry) -> Itinerary {
        Itinerary::new().add("cook_fry")
    }

    fn activities(&self) -> Vec<String> {
        vec!["cook_fry".to_string()]
    }
}

pub struct BurgerPlanner;

impl ItineraryPlanner<Burger> for BurgerPlanner {
    fn plan(&self, burger: &Burger) -> Itinerary {
        Itinerary::new()
            .add("grill_patty")
            .add_if(burger.cheese, "add_cheese")
            .add("assemble_burger")
    }

    fn activities(&self) -> Vec<String> {
        vec![
            "grill_patty".to_string(),
            "add_cheese".to_string(),
            "assemble_burger".to_string(),
        ]
    }
}

pub struct ShakePlanner;

impl ItineraryPlanner<Shake> for ShakePlanner {
    fn plan(&self, _shake: &Shake) -> Itinerary {
        Itinerary::new().add("pour_shake")
    }

    fn activities(&self) -> Vec<String> {
        vec!["pour_shake".to_string()]
    }
}

/// Registry with every kitchen activity and planner.
///
/// Fries of size "burnt" fail; shakes of flavor "slow" take `slow_shake` to pour.
pub fn kitchen_registry(slow_shake: Duration) -> Arc<PlanRegistry> {
    let registry = PlanRegistry::new();
    registry
        .register_activity(activity_fn("cook_fry", |ctx: ActivityContext| async move {
            let size: String = ctx.argument("size").unwrap_or_default();
            if size == "burnt" {
                return Err(ActivityError::failed("fryer oil too hot"));
            }
            Ok(json!({ "description": format!("{size} fries") }))
        }))
        .unwrap();
    registry
        .register_activity(activity_fn("grill_patty", |ctx: ActivityContext| async move {
            let weight: f64 = ctx.argument("weight").unwrap_or_default();
            Ok(json!({ "patty": format!("{weight:.1}") }))
        }))
        .unwrap();
    registry
        .register_activity(activity_fn("add_cheese", |_ctx: ActivityContext| async move {
            Ok(json!({ "topping": "cheddar" }))
        }))
        .unwrap();
    registry
        .register_activity(activity_fn("assemble_burger", |ctx: ActivityContext| async move {
            let patty: String = ctx.variable("patty").unwrap_or_default();
            let description = match ctx.variable::<String>("topping") {
                Some(topping) => format!("{patty} burger with {topping}"),
                None => format!("{patty} burger"),
            };
            Ok(json!({ "description": description }))
        }))
        .unwrap();
    registry
        .register_activity(activity_fn("pour_shake", move |ctx: ActivityContext| async move {
            let flavor: String = ctx.argument("flavor").unwrap_or_default();
            if flavor == "slow" {
                tokio::time::sleep(slow_shake).await;
            }
            Ok(json!({ "description": format!("{flavor} shake") }))
        }))
        .unwrap();

    registry.register_planner::<Fry, _>(FryPlanner).unwrap();
    registry.register_planner::<Burger, _>(BurgerPlanner).unwrap();
    registry.register_planner::<Shake, _>(ShakePlanner).unwrap();
    Arc::new(registry)
}

pub fn kitchen_factory(slow_shake: Duration) -> PlanExecutorFactory {
    PlanExecutorFactory::new(kitchen_registry(slow_shake), ExecutorConfig::default())
}

/// Consumer that forks an order into lines and responds once all are ready
pub struct OrderConsumer {
    pub fries: PlanExecutor<Fry, LineReady>,
    pub burgers: PlanExecutor<Burger, LineReady>,
    pub shakes: PlanExecutor<Shake, LineReady>,
    pub time_to_live: Option<Duration>,
}

impl OrderConsumer {
    pub fn new(factory: &PlanExecutorFactory, time_to_live: Option<Duration>) -> Self {
        Self {
            fries: factory.create_executor().unwrap(),
            burgers: factory.create_executor().unwrap(),
            shakes: factory.create_executor().unwrap(),
            time_to_live,
        }
    }
}

#[async_trait]
impl Consumer for OrderConsumer {
    async fn consume(&self, context: &ConsumeContext<'_>) -> PipelineResult<()> {
        let order: SubmitOrder = context.body()?;
        let plan = context.plan_context(self.time_to_live);
        let fork_failed =
            |e: ForkJoinError| PipelineError::consumer_failed("order_consumer", e.to_string());

        let mut line_ids = Vec::new();
        for fry in order.fries {
            let handle = plan.push(fry).map_err(fork_failed)?;
            line_ids.push(handle.sub_task_id());
            self.fries.spawn(handle);
        }
        for burger in order.burgers {
            let handle = plan.push(burger).map_err(fork_failed)?;
            line_ids.push(handle.sub_task_id());
            self.burgers.spawn(handle);
        }
        for shake in order.shakes {
            let handle = plan.push(shake).map_err(fork_failed)?;
            line_ids.push(handle.sub_task_id());
            self.shakes.spawn(handle);
        }

        let aggregate = plan.await_all().await?;
        let lines = line_ids
            .iter()
            .map(|id| {
                aggregate
                    .get::<LineReady>(*id)
                    .map(|line| (*id, line.description))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(fork_failed)?;

        context
            .respond(
                "order_completed",
                &OrderCompleted {
                    order_id: order.order_id,
                    lines,
                },
            )
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "order_consumer"
    }
}
