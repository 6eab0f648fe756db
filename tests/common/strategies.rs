//! Proptest strategies for fork-join and dispatch properties

use proptest::prelude::*;

/// Sub-task count with a shuffled completion order over `0..count`
pub fn completion_order_strategy() -> impl Strategy<Value = Vec<usize>> {
    (1usize..16).prop_flat_map(|count| Just((0..count).collect::<Vec<_>>()).prop_shuffle())
}

/// Per-sub-task outcome flags: `true` means the sub-task faults
pub fn fault_pattern_strategy() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 1..12)
}

/// Number of concurrent dispatches with the order their guards are released
pub fn release_order_strategy() -> impl Strategy<Value = Vec<usize>> {
    (1usize..32).prop_flat_map(|count| Just((0..count).collect::<Vec<_>>()).prop_shuffle())
}

/// Shake flavors that never trigger the slow path
pub fn flavor_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["vanilla", "chocolate", "strawberry", "banana"])
        .prop_map(str::to_string)
}
