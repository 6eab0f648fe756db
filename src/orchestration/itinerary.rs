//! # Itineraries
//!
//! An itinerary is the ordered list of activities a sub-task passes through.
//! Planners build one per sub-task from the payload alone, so planning can be
//! repeated for retries without side effects.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// A unit of work that can be forked from an originating request
pub trait SubTask: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Identifier keying this sub-task's slot and aggregate entry
    fn sub_task_id(&self) -> Uuid;

    fn sub_task_type() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

/// Retry behaviour for one activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// Single attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            interval: Duration::ZERO,
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval: Duration::ZERO,
        }
    }

    pub fn interval(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Reference to a registered activity, with optional per-step overrides
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRef {
    name: String,
    retry: Option<RetryPolicy>,
    timeout: Option<Duration>,
}

impl ActivityRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retry: None,
            timeout: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retry(&self) -> Option<RetryPolicy> {
        self.retry
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl From<&str> for ActivityRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ActivityRef {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Ordered activity sequence for one sub-task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Itinerary {
    activities: Vec<ActivityRef>,
}

impl Itinerary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, activity: impl Into<ActivityRef>) -> Self {
        self.activities.push(activity.into());
        self
    }

    /// Append only when `condition` holds
    pub fn add_if(self, condition: bool, activity: impl Into<ActivityRef>) -> Self {
        if condition {
            self.add(activity)
        } else {
            self
        }
    }

    pub fn activities(&self) -> &[ActivityRef] {
        &self.activities
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

/// Builds the itinerary for one sub-task type
pub trait ItineraryPlanner<T: SubTask>: Send + Sync + 'static {
    fn plan(&self, sub_task: &T) -> Itinerary;

    /// Every activity name `plan` may emit; checked against the registry at
    /// registration time
    fn activities(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Burger {
        burger_id: Uuid,
        cheese: bool,
    }

    impl SubTask for Burger {
        fn sub_task_id(&self) -> Uuid {
            self.burger_id
        }
    }

    struct BurgerPlanner;

    impl ItineraryPlanner<Burger> for BurgerPlanner {
        fn plan(&self, burger: &Burger) -> Itinerary {
            Itinerary::new()
                .add("grill_burger")
                .add_if(burger.cheese, "add_cheese")
                .add(ActivityRef::new("assemble_burger").with_retry(RetryPolicy::immediate(3)))
        }

        fn activities(&self) -> Vec<String> {
            vec!["grill_burger".into(), "add_cheese".into(), "assemble_burger".into()]
        }
    }

    #[test]
    fn test_plan_depends_on_payload_content() {
        let planner = BurgerPlanner;
        let plain = planner.plan(&Burger {
            burger_id: Uuid::new_v4(),
            cheese: false,
        });
        let cheesy = planner.plan(&Burger {
            burger_id: Uuid::new_v4(),
            cheese: true,
        });

        assert_eq!(plain.len(), 2);
        assert_eq!(cheesy.len(), 3);
        assert_eq!(cheesy.activities()[1].name(), "add_cheese");
        assert_eq!(cheesy.activities()[2].retry(), Some(RetryPolicy::immediate(3)));
    }

    #[test]
    fn test_retry_policy_never_below_one_attempt() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
        assert_eq!(RetryPolicy::default(), RetryPolicy::none());
        assert!(Burger::sub_task_type().ends_with("Burger"));
    }
}
