mod support;

use std::sync::Arc;
use std::time::Duration;

use locator_core::store::keys::{cell_members_key, demand_marker_key};
use locator_core::store::{LocationStore, MemoryStore};
use locator_core::test_helpers::{center, seed_ring, test_service, update_at, CENTER_LAT, CENTER_LNG};
use locator_core::{LocatorError, NearbyQuery};

fn query() -> NearbyQuery {
    NearbyQuery::new(CENTER_LAT, CENTER_LNG, 1.0)
}

#[tokio::test(start_paused = true)]
async fn silent_agent_disappears_after_the_location_ttl() {
    let harness = test_service();
    let ack = harness
        .service
        .update_location(update_at("d-1", center(), "sedan", true))
        .await
        .expect("update");

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(harness.service.get_location("d-1").await.is_ok());
    assert!(harness.service.find_nearby(&query()).await.expect("search").contains("d-1"));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(matches!(
        harness.service.get_location("d-1").await,
        Err(LocatorError::NotFound(_))
    ));
    assert!(harness.service.find_nearby(&query()).await.expect("search").is_empty());
    assert!(harness
        .store
        .set_members(&cell_members_key(&ack.cell_id))
        .await
        .expect("members")
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn each_update_refreshes_the_window() {
    let harness = test_service();
    for _ in 0..4 {
        harness
            .service
            .update_location(update_at("d-1", center(), "sedan", true))
            .await
            .expect("update");
        tokio::time::advance(Duration::from_secs(20)).await;
    }
    assert!(harness.service.find_nearby(&query()).await.expect("search").contains("d-1"));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(harness.service.find_nearby(&query()).await.expect("search").is_empty());
}

#[tokio::test(start_paused = true)]
async fn surge_is_served_from_cache_until_it_goes_stale() {
    let harness = test_service();
    seed_ring(&harness.service, "d", 5, 0.05, "sedan").await;
    for i in 0..5 {
        harness
            .service
            .track_request(&format!("r-{i}"), CENTER_LAT, CENTER_LNG)
            .await
            .expect("track");
    }
    let first = harness.service.surge_at(CENTER_LAT, CENTER_LNG).await.expect("surge");
    assert!((first - 1.25).abs() < 1e-9);

    for i in 5..10 {
        harness
            .service
            .track_request(&format!("r-{i}"), CENTER_LAT, CENTER_LNG)
            .await
            .expect("track");
    }
    tokio::time::advance(Duration::from_secs(10)).await;
    let cached = harness.service.surge_at(CENTER_LAT, CENTER_LNG).await.expect("surge");
    assert_eq!(cached, first);

    tokio::time::advance(Duration::from_secs(21)).await;
    seed_ring(&harness.service, "d", 5, 0.05, "sedan").await;
    let recomputed = harness.service.surge_at(CENTER_LAT, CENTER_LNG).await.expect("surge");
    assert!((recomputed - 1.75).abs() < 1e-9);

    let telemetry = harness.service.telemetry();
    assert_eq!(telemetry.surge_cache_hits, 1);
    assert_eq!(telemetry.surge_cache_misses, 2);
}

#[tokio::test(start_paused = true)]
async fn demand_markers_expire_after_ten_minutes() {
    let harness = test_service();
    harness
        .service
        .track_request("r-1", CENTER_LAT, CENTER_LNG)
        .await
        .expect("track");
    assert!(harness
        .store
        .get(&demand_marker_key("r-1"))
        .await
        .expect("marker")
        .is_some());

    tokio::time::advance(Duration::from_secs(9 * 60)).await;
    seed_ring(&harness.service, "d", 1, 0.05, "sedan").await;
    let zone = harness
        .service
        .surge_zone_at(CENTER_LAT, CENTER_LNG)
        .await
        .expect("zone");
    assert_eq!(zone.demand, 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    seed_ring(&harness.service, "d", 1, 0.05, "sedan").await;
    let zone = harness
        .service
        .surge_zone_at(CENTER_LAT, CENTER_LNG)
        .await
        .expect("zone");
    assert_eq!(zone.demand, 0);
    assert_eq!(zone.multiplier, 1.0);
    assert!(!harness.service.untrack_request("r-1").await.expect("untrack"));
}

#[tokio::test(start_paused = true)]
async fn reaper_purges_expired_keys() {
    let harness = test_service();
    seed_ring(&harness.service, "d", 3, 0.1, "sedan").await;
    let store: &Arc<MemoryStore> = &harness.store;
    assert!(store.key_count() > 0);

    let reaper = store.spawn_reaper(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(31)).await;

    // The reaper already dropped everything with a TTL; only the geo-index remains.
    assert_eq!(store.purge_expired(), 0);
    assert_eq!(store.key_count(), 1);
    reaper.abort();
}
