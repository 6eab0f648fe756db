//! # Plan Registry
//!
//! Explicit startup registration of activities (by name) and itinerary
//! planners (by sub-task type). Planners are validated against the registered
//! activities when they are added, so a broken itinerary fails before any
//! traffic is accepted.
//!
//! ## Usage
//!
//! ```rust
//! use relay_core::orchestration::{activity_fn, Itinerary, ItineraryPlanner, PlanRegistry, SubTask};
//! use serde::{Deserialize, Serialize};
//! use uuid::Uuid;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Shake { shake_id: Uuid, flavor: String }
//!
//! impl SubTask for Shake {
//!     fn sub_task_id(&self) -> Uuid { self.shake_id }
//! }
//!
//! struct ShakePlanner;
//!
//! impl ItineraryPlanner<Shake> for ShakePlanner {
//!     fn plan(&self, _shake: &Shake) -> Itinerary { Itinerary::new().add("pour_shake") }
//!     fn activities(&self) -> Vec<String> { vec!["pour_shake".to_string()] }
//! }
//!
//! let registry = PlanRegistry::new();
//! registry
//!     .register_activity(activity_fn("pour_shake", |ctx| async move { Ok(ctx.arguments().clone()) }))
//!     .unwrap();
//! registry.register_planner::<Shake, _>(ShakePlanner).unwrap();
//! assert!(registry.has_planner::<Shake>());
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::info;

use super::activity::Activity;
use super::itinerary::{ItineraryPlanner, SubTask};
use crate::config::{ConfigResult, ConfigurationError};

struct PlannerEntry {
    sub_task_type: &'static str,
    /// Holds an `Arc<dyn ItineraryPlanner<T>>` for the keyed `T`
    planner: Box<dyn Any + Send + Sync>,
}

/// Registry of activities and itinerary planners
#[derive(Default)]
pub struct PlanRegistry {
    activities: DashMap<String, Arc<dyn Activity>>,
    planners: DashMap<TypeId, PlannerEntry>,
}

impl std::fmt::Debug for PlanRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanRegistry")
            .field("activities", &self.activity_names())
            .field("planners", &self.planner_types())
            .finish()
    }
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an activity under its own name
    pub fn register_activity(&self, activity: impl Activity) -> ConfigResult<()> {
        self.register_activity_arc(Arc::new(activity))
    }

    pub fn register_activity_arc(&self, activity: Arc<dyn Activity>) -> ConfigResult<()> {
        let name = activity.name().to_string();
        match self.activities.entry(name.clone()) {
            Entry::Occupied(_) => Err(ConfigurationError::duplicate_registration("activity", name)),
            Entry::Vacant(slot) => {
                slot.insert(activity);
                info!(activity = %name, "Registered activity");
                Ok(())
            }
        }
    }

    /// Register the planner for sub-task type `T`.
    ///
    /// Every activity the planner declares must already be registered.
    pub fn register_planner<T, P>(&self, planner: P) -> ConfigResult<()>
    where
        T: SubTask,
        P: ItineraryPlanner<T>,
    {
        let sub_task_type = T::sub_task_type();

        for activity in planner.activities() {
            if !self.activities.contains_key(&activity) {
                return Err(ConfigurationError::ActivityNotRegistered {
                    sub_task_type: sub_task_type.to_string(),
                    activity,
                });
            }
        }

        match self.planners.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => Err(ConfigurationError::duplicate_registration(
                "itinerary planner",
                sub_task_type,
            )),
            Entry::Vacant(slot) => {
                let planner: Arc<dyn ItineraryPlanner<T>> = Arc::new(planner);
                slot.insert(PlannerEntry {
                    sub_task_type,
                    planner: Box::new(planner),
                });
                info!(sub_task_type = %sub_task_type, "Registered itinerary planner");
                Ok(())
            }
        }
    }

    pub fn planner<T: SubTask>(&self) -> ConfigResult<Arc<dyn ItineraryPlanner<T>>> {
        self.planners
            .get(&TypeId::of::<T>())
            .and_then(|entry| {
                entry
                    .planner
                    .downcast_ref::<Arc<dyn ItineraryPlanner<T>>>()
                    .cloned()
            })
            .ok_or_else(|| ConfigurationError::PlannerNotRegistered {
                sub_task_type: T::sub_task_type().to_string(),
            })
    }

    pub fn has_planner<T: SubTask>(&self) -> bool {
        self.planners.contains_key(&TypeId::of::<T>())
    }

    pub fn activity(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn activity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.activities.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn planner_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> =
            self.planners.iter().map(|e| e.value().sub_task_type).collect();
        types.sort_unstable();
        types
    }
}
