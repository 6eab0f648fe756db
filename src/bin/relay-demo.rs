//! # Relay Demo
//!
//! Runs restaurant orders through the receive pipeline. The order consumer
//! forks each order line (fries, burgers, shakes) into a sub-task, executes
//! them concurrently through their itineraries and responds with the combined
//! order once every line is ready. Shakes are poured by a remote activity
//! served by an in-process request router.
//!
//! Configuration is read from `RELAY_CONFIG_PATH` (or `config/relay.toml`)
//! with `RELAY__*` environment overrides.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use relay_core::config::{ConfigManager, ExecutorConfig};
use relay_core::dispatch::{
    ConsumeContext, ConsumePipe, Consumer, InboundDelivery, MessageReceiver, PipelineError,
    PipelineResult,
};
use relay_core::messaging::{InMemoryEndpoint, InMemoryTransportLock, ReceivedMessage};
use relay_core::orchestration::{
    activity_fn, ActivityContext, ActivityError, ForkJoinError, InMemoryRequestRouter, Itinerary,
    ItineraryPlanner, PlanExecutor, PlanExecutorFactory, PlanRegistry, RemoteActivity, SubTask,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Fry {
    fry_id: Uuid,
    size: String,
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
struct Burger {
    burger_id: Uuid,
    weight: f64,
    cheese: bool,
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
struct Shake {
    shake_id: Uuid,
    flavor: String,
    size: String,
}

impl SubTask for Shake {
    fn sub_task_id(&self) -> Uuid {
        self.shake_id
    }

    fn sub_task_type() -> &'static str {
        "shake"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReadyItem {
    description: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubmitOrder {
    order_id: Uuid,
    #[serde(default)]
    fries: Vec<Fry>,
    #[serde(default)]
    burgers: Vec<Burger>,
    #[serde(default)]
    shakes: Vec<Shake>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderCompleted {
    order_id: Uuid,
    lines: Vec<String>,
}

struct FryPlanner;

impl ItineraryPlanner<Fry> for FryPlanner {
    fn plan(&self, _fry: &Fry) -> Itinerary {
        Itinerary::new().add("cook_fry")
    }

    fn activities(&self) -> Vec<String> {
        vec!["cook_fry".to_string()]
    }
}

struct BurgerPlanner;

impl ItineraryPlanner<Burger> for BurgerPlanner {
    fn plan(&self, burger: &Burger) -> Itinerary {
        Itinerary::new()
            .add("grill_patty")
            .add_if(burger.cheese, "add_cheese")
            .add("assemble_burger")
    }

    fn activities(&self) -> Vec<String> {
        ["grill_patty", "add_cheese", "assemble_burger"]
            .iter()
            .map(|name| name.to_string())
            .collect()
    }
}

struct ShakePlanner;

impl ItineraryPlanner<Shake> for ShakePlanner {
    fn plan(&self, _shake: &Shake) -> Itinerary {
        Itinerary::new().add("pour_shake")
    }

    fn activities(&self) -> Vec<String> {
        vec!["pour_shake".to_string()]
    }
}

struct OrderConsumer {
    fries: PlanExecutor<Fry, ReadyItem>,
    burgers: PlanExecutor<Burger, ReadyItem>,
    shakes: PlanExecutor<Shake, ReadyItem>,
}

#[async_trait]
impl Consumer for OrderConsumer {
    async fn consume(&self, context: &ConsumeContext<'_>) -> PipelineResult<()> {
        let order: SubmitOrder = context.body()?;
        let plan = context.plan_context(None);
        let fork_failed = |e: ForkJoinError| {
            PipelineError::consumer_failed(self.name(), e.to_string())
        };

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
        let lines = aggregate
            .collect::<ReadyItem>(&line_ids)
            .map_err(fork_failed)?
            .into_iter()
            .map(|item| item.description)
            .collect();

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

fn register_kitchen(
    registry: &PlanRegistry,
    router: Arc<InMemoryRequestRouter>,
    config: &ExecutorConfig,
) -> Result<()> {
    registry.register_activity(activity_fn("cook_fry", |ctx: ActivityContext| async move {
        let size: String = ctx.argument("size").unwrap_or_else(|| "regular".to_string());
        Ok(json!({ "description": format!("{size} fries") }))
    }))?;
    registry.register_activity(activity_fn("grill_patty", |ctx: ActivityContext| async move {
        let Some(weight) = ctx.argument::<f64>("weight") else {
            return Err(ActivityError::failed("burger has no weight"));
        };
        Ok(json!({ "patty": format!("{weight:.1}oz patty") }))
    }))?;
    registry.register_activity(activity_fn("add_cheese", |_ctx: ActivityContext| async move {
        Ok(json!({ "topping": "cheddar" }))
    }))?;
    registry.register_activity(activity_fn("assemble_burger", |ctx: ActivityContext| async move {
        let patty: String = ctx.variable("patty").unwrap_or_default();
        let description = match ctx.variable::<String>("topping") {
            Some(topping) => format!("burger with {patty} and {topping}"),
            None => format!("burger with {patty}"),
        };
        Ok(json!({ "description": description }))
    }))?;
    registry.register_activity(RemoteActivity::from_config(
        "pour_shake",
        "shake-machine",
        router,
        config,
    ))?;

    registry.register_planner::<Fry, _>(FryPlanner)?;
    registry.register_planner::<Burger, _>(BurgerPlanner)?;
    registry.register_planner::<Shake, _>(ShakePlanner)?;
    Ok(())
}

fn sample_order() -> SubmitOrder {
    SubmitOrder {
        order_id: Uuid::new_v4(),
        fries: vec![Fry {
            fry_id: Uuid::new_v4(),
            size: "large".to_string(),
        }],
        burgers: vec![Burger {
            burger_id: Uuid::new_v4(),
            weight: 0.5,
            cheese: true,
        }],
        shakes: vec![Shake {
            shake_id: Uuid::new_v4(),
            flavor: "chocolate".to_string(),
            size: "medium".to_string(),
        }],
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let manager = ConfigManager::load().context("failed to load relay configuration")?;
    let config = manager.config().clone();
    relay_core::logging::init_with_config(&config.logging);

    info!(
        environment = %manager.environment(),
        max_concurrent = config.dispatch.max_concurrent_dispatches,
        "🚀 Starting relay demo"
    );

    let router = Arc::new(InMemoryRequestRouter::new());
    router.route("shake-machine", |request| async move {
        let flavor = request.body["flavor"].as_str().unwrap_or("vanilla").to_string();
        let size = request.body["size"].as_str().unwrap_or("regular").to_string();
        Ok(json!({ "description": format!("{size} {flavor} shake") }))
    });

    let registry = Arc::new(PlanRegistry::new());
    register_kitchen(&registry, Arc::clone(&router), &config.executor)?;
    let factory = PlanExecutorFactory::new(Arc::clone(&registry), config.executor.clone());

    let (endpoint, mut replies) = InMemoryEndpoint::new();
    // Orders never wait forever on a stuck line, even without a configured default.
    let mut fork_join = config.fork_join.clone();
    fork_join.default_time_to_live_ms.get_or_insert(10_000);
    let pipe = ConsumePipe::new()
        .with_send_endpoint(Arc::new(endpoint))
        .with_fork_join_config(fork_join);
    pipe.register(
        "submit_order",
        Arc::new(OrderConsumer {
            fries: factory.create_executor()?,
            burgers: factory.create_executor()?,
            shakes: factory.create_executor()?,
        }),
    )?;

    let receiver = Arc::new(MessageReceiver::new("orders", Arc::new(pipe), &config));
    let mut zero_activity = receiver.subscribe_zero_activity();

    let (deliveries, inbox) = mpsc::channel(16);
    let running = tokio::spawn(Arc::clone(&receiver).run(inbox));

    for _ in 0..3 {
        let order = sample_order();
        let message = ReceivedMessage::new("submit_order", serde_json::to_value(&order)?)
            .with_response_address("order-replies");
        let lock = Arc::new(InMemoryTransportLock::new(message.message_id.to_string()));
        deliveries
            .send(InboundDelivery::new(message).with_lock(lock))
            .await
            .context("receiver stopped before accepting deliveries")?;
    }
    drop(deliveries);

    for _ in 0..3 {
        match tokio::time::timeout(Duration::from_secs(5), replies.recv()).await {
            Ok(Some(reply)) => {
                let completed: OrderCompleted = reply.deserialize_body()?;
                info!(order_id = %completed.order_id, lines = ?completed.lines, "🍔 Order ready");
            }
            Ok(None) => break,
            Err(_) => {
                warn!("Timed out waiting for an order reply");
                break;
            }
        }
    }

    running.await.context("receiver task panicked")??;
    if let Ok(event) = zero_activity.try_recv() {
        info!(dispatch_count = event.dispatch_count, "💤 Receiver idle");
    }

    let metrics = receiver.metrics();
    info!(
        dispatched = metrics.dispatch_count,
        faulted = metrics.faulted_count,
        max_concurrent = metrics.max_concurrent_dispatch_count,
        "🛑 Relay demo finished"
    );
    Ok(())
}
