mod common;

use common::strategies::*;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use relay_core::dispatch::DispatchCounters;
use relay_core::orchestration::{ExecutePlanContext, Itinerary, PlanFault, SubTask};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Ticket {
    id: Uuid,
    seq: usize,
}

impl SubTask for Ticket {
    fn sub_task_id(&self) -> Uuid {
        self.id
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Property: the aggregate holds one result per sub-task in declaration
    /// order, whatever order the results arrive in
    #[test]
    fn aggregate_is_independent_of_completion_order(order in completion_order_strategy()) {
        let aggregate = runtime().block_on(async {
            let plan = ExecutePlanContext::new(Uuid::new_v4());
            let mut handles: Vec<_> = (0..order.len())
                .map(|seq| Some(plan.push(Ticket { id: Uuid::new_v4(), seq }).unwrap()))
                .collect();

            for index in &order {
                let handle = handles[*index].take().unwrap();
                let seq = handle.sub_task().seq;
                handle.complete(&json!({ "seq": seq })).unwrap();
            }
            plan.await_all().await
        });

        let aggregate = aggregate.unwrap();
        prop_assert_eq!(aggregate.len(), order.len());
        for (position, id) in aggregate.order.iter().enumerate() {
            prop_assert_eq!(&aggregate.results[id]["seq"], &json!(position));
        }
    }

    /// Property: every faulted slot is reported and every other slot stays
    /// retrievable
    #[test]
    fn all_faults_are_collected(pattern in fault_pattern_strategy()) {
        let outcome = runtime().block_on(async {
            let plan = ExecutePlanContext::new(Uuid::new_v4());
            for (seq, faults) in pattern.iter().enumerate() {
                let handle = plan.push(Ticket { id: Uuid::new_v4(), seq }).unwrap();
                if *faults {
                    let sub_task_id = handle.sub_task_id();
                    handle.fault(PlanFault::Abandoned { sub_task_id });
                } else {
                    handle.complete(&json!({ "seq": seq })).unwrap();
                }
            }
            plan.await_all().await
        });

        let expected_faults = pattern.iter().filter(|faults| **faults).count();
        match outcome {
            Ok(aggregate) => {
                prop_assert_eq!(expected_faults, 0);
                prop_assert_eq!(aggregate.len(), pattern.len());
            }
            Err(fault) => {
                prop_assert_eq!(fault.faults().len(), expected_faults);
                prop_assert_eq!(fault.completed().len(), pattern.len() - expected_faults);
            }
        }
    }

    /// Property: releasing N overlapping dispatches in any order produces one
    /// zero-activity event and leaves the active count at zero
    #[test]
    fn overlapping_dispatches_signal_idle_once(release in release_order_strategy()) {
        let counters = Arc::new(DispatchCounters::new(8));
        let mut zero_activity = counters.subscribe_zero_activity();

        let mut guards: Vec<_> = release.iter().map(|_| Some(counters.begin())).collect();
        prop_assert_eq!(counters.max_concurrent_dispatch_count(), release.len());

        for index in &release {
            prop_assert!(zero_activity.try_recv().is_err());
            guards[*index].take();
        }

        prop_assert_eq!(counters.active_dispatch_count(), 0);
        prop_assert_eq!(counters.zero_activity_count(), 1);
        prop_assert!(zero_activity.try_recv().is_ok());
        prop_assert!(zero_activity.try_recv().is_err());
    }

    /// Property: conditional steps appear only when their condition holds,
    /// and in the order they were added
    #[test]
    fn itinerary_keeps_conditional_steps_in_order(conditions in prop::collection::vec(any::<bool>(), 0..10)) {
        let itinerary = conditions
            .iter()
            .enumerate()
            .fold(Itinerary::new(), |itinerary, (step, include)| {
                itinerary.add_if(*include, format!("step_{step}"))
            });

        let expected: Vec<String> = conditions
            .iter()
            .enumerate()
            .filter(|(_, include)| **include)
            .map(|(step, _)| format!("step_{step}"))
            .collect();
        let names: Vec<String> = itinerary
            .activities()
            .iter()
            .map(|activity| activity.name().to_string())
            .collect();
        prop_assert_eq!(names, expected);
    }

    /// Property: shake sub-tasks carry their flavor through serialization
    #[test]
    fn shake_arguments_survive_serialization(flavor in flavor_strategy()) {
        let shake = common::Shake::new(&flavor);
        let arguments = serde_json::to_value(&shake).unwrap();
        prop_assert_eq!(arguments["flavor"].as_str(), Some(flavor.as_str()));
        prop_assert_eq!(
            common::Shake::sub_task_type(),
            "shake"
        );
    }
}
