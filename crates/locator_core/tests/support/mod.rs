#![allow(dead_code, unused_imports)]

pub mod flaky_store;

use locator_core::model::NearbyResult;

pub use flaky_store::FlakyStore;

/// Agent ids of a result, in result order.
pub fn ids(result: &NearbyResult) -> Vec<&str> {
    result
        .agents
        .iter()
        .map(|agent| agent.location.agent_id.as_str())
        .collect()
}

pub fn assert_sorted_by_distance(result: &NearbyResult) {
    for pair in result.agents.windows(2) {
        assert!(
            pair[0].distance_km <= pair[1].distance_km,
            "results out of order: {} km before {} km",
            pair[0].distance_km,
            pair[1].distance_km
        );
    }
}

/// Let spawned fire-and-forget tasks run on the current-thread test runtime.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
