mod support;

use locator_core::spatial::{GeoPoint, SURGE_RESOLUTION};
use locator_core::surge::MAX_MULTIPLIER;
use locator_core::test_helpers::{offset, seed_ring, test_service, test_service_with, CENTER_LAT, CENTER_LNG};
use locator_core::{LocatorConfig, LocatorError};

async fn track_many(harness: &locator_core::test_helpers::TestService, prefix: &str, count: usize) {
    for i in 0..count {
        harness
            .service
            .track_request(&format!("{prefix}-{i}"), CENTER_LAT, CENTER_LNG)
            .await
            .expect("track");
    }
}

#[tokio::test]
async fn balanced_zone_prices_at_one_and_a_quarter() {
    let harness = test_service();
    seed_ring(&harness.service, "d", 5, 0.05, "sedan").await;
    track_many(&harness, "r", 5).await;

    let zone = harness
        .service
        .surge_zone_at(CENTER_LAT, CENTER_LNG)
        .await
        .expect("zone");
    assert_eq!(zone.demand, 5);
    assert_eq!(zone.supply, 5);
    assert!((zone.multiplier - 1.25).abs() < 1e-9);

    let expected_cell = GeoPoint::new(CENTER_LAT, CENTER_LNG)
        .expect("point")
        .to_cell(SURGE_RESOLUTION);
    assert_eq!(zone.cell_id, expected_cell.to_string());
}

#[tokio::test]
async fn no_supply_with_demand_is_capped() {
    let harness = test_service();
    track_many(&harness, "r", 3).await;

    let multiplier = harness.service.surge_at(CENTER_LAT, CENTER_LNG).await.expect("surge");
    assert_eq!(multiplier, MAX_MULTIPLIER);
}

#[tokio::test]
async fn plenty_of_supply_means_no_surge() {
    let harness = test_service();
    seed_ring(&harness.service, "d", 10, 0.1, "sedan").await;
    track_many(&harness, "r", 2).await;

    let multiplier = harness.service.surge_at(CENTER_LAT, CENTER_LNG).await.expect("surge");
    assert_eq!(multiplier, 1.0);
}

#[tokio::test]
async fn offline_and_distant_agents_are_not_supply() {
    let harness = test_service();
    seed_ring(&harness.service, "d", 2, 0.05, "sedan").await;
    harness
        .service
        .update_location(locator_core::test_helpers::update_at("off", offset(0.05, 10.0), "sedan", false))
        .await
        .expect("offline");
    seed_ring(&harness.service, "far", 3, 0.0, "sedan").await;
    for i in 0..3 {
        let far = offset(40.0, 120.0 * i as f64);
        harness
            .service
            .update_location(locator_core::test_helpers::update_at(&format!("far-{i}"), far, "sedan", true))
            .await
            .expect("move away");
    }
    track_many(&harness, "r", 2).await;

    let zone = harness
        .service
        .surge_zone_at(CENTER_LAT, CENTER_LNG)
        .await
        .expect("zone");
    assert_eq!(zone.supply, 2);
    assert_eq!(zone.demand, 2);
}

#[tokio::test]
async fn untracked_requests_stop_counting() {
    let harness = test_service();
    seed_ring(&harness.service, "d", 1, 0.05, "sedan").await;
    track_many(&harness, "r", 4).await;

    assert!(harness.service.untrack_request("r-0").await.expect("untrack"));
    assert!(harness.service.untrack_request("r-1").await.expect("untrack"));
    assert!(!harness.service.untrack_request("r-1").await.expect("second untrack"));
    assert!(!harness.service.untrack_request("never-tracked").await.expect("unknown"));

    let zone = harness
        .service
        .surge_zone_at(CENTER_LAT, CENTER_LNG)
        .await
        .expect("zone");
    assert_eq!(zone.demand, 2);
    assert_eq!(zone.supply, 1);
    assert!((zone.multiplier - 1.75).abs() < 1e-9);
}

#[tokio::test]
async fn retracking_moves_demand_to_the_new_zone() {
    let harness = test_service();
    track_many(&harness, "r", 1).await;
    let elsewhere = offset(60.0, 0.0);
    let marker = harness
        .service
        .track_request("r-0", elsewhere.lat(), elsewhere.lng())
        .await
        .expect("retrack");
    assert_eq!(marker.cell_id, elsewhere.to_cell(SURGE_RESOLUTION).to_string());

    let home = harness
        .service
        .surge_zone_at(CENTER_LAT, CENTER_LNG)
        .await
        .expect("home");
    assert_eq!(home.demand, 0);

    let away = harness
        .service
        .surge_zone_at(elsewhere.lat(), elsewhere.lng())
        .await
        .expect("away");
    assert_eq!(away.demand, 1);
}

#[tokio::test]
async fn zones_cover_the_requested_ring() {
    let harness = test_service();
    seed_ring(&harness.service, "d", 3, 0.05, "sedan").await;

    let zones = harness
        .service
        .surge_zones(CENTER_LAT, CENTER_LNG, Some(1))
        .await
        .expect("zones");
    assert_eq!(zones.len(), 7);
    assert!(zones.iter().all(|zone| (1.0..=MAX_MULTIPLIER).contains(&zone.multiplier)));

    let wider = harness
        .service
        .surge_zones(CENTER_LAT, CENTER_LNG, Some(2))
        .await
        .expect("zones");
    assert_eq!(wider.len(), 19);

    let default_ring = harness
        .service
        .surge_zones(CENTER_LAT, CENTER_LNG, None)
        .await
        .expect("zones");
    assert_eq!(default_ring.len(), 7);
}

#[tokio::test]
async fn oversized_zone_ring_is_rejected_before_any_work() {
    let harness = test_service();

    for k in [u32::MAX, 6] {
        let err = harness
            .service
            .surge_zones(CENTER_LAT, CENTER_LNG, Some(k))
            .await
            .expect_err("k above bound");
        assert!(matches!(err, LocatorError::Validation(_)), "k={k}: {err:?}");
    }
    assert_eq!(harness.service.telemetry().surge_cache_misses, 0);

    let widest = harness
        .service
        .surge_zones(CENTER_LAT, CENTER_LNG, Some(5))
        .await
        .expect("k at bound");
    assert_eq!(widest.len(), 91);
}

#[tokio::test]
async fn zone_ring_bound_follows_config() {
    let config = LocatorConfig {
        max_zone_ring_k: 2,
        ..LocatorConfig::default()
    };
    let harness = test_service_with(&config);

    assert!(matches!(
        harness.service.surge_zones(CENTER_LAT, CENTER_LNG, Some(3)).await,
        Err(LocatorError::Validation(_))
    ));
    let zones = harness
        .service
        .surge_zones(CENTER_LAT, CENTER_LNG, Some(2))
        .await
        .expect("k at bound");
    assert_eq!(zones.len(), 19);
}

#[tokio::test]
async fn fare_is_scaled_by_the_zone_multiplier() {
    let harness = test_service();
    seed_ring(&harness.service, "d", 5, 0.05, "sedan").await;
    track_many(&harness, "r", 5).await;

    let quote = harness
        .service
        .surged_fare(CENTER_LAT, CENTER_LNG, 400.0)
        .await
        .expect("fare");
    assert!((quote.multiplier - 1.25).abs() < 1e-9);
    assert!((quote.fare - 500.0).abs() < 1e-6);

    let err = harness
        .service
        .surged_fare(CENTER_LAT, CENTER_LNG, -1.0)
        .await
        .expect_err("negative fare");
    assert!(matches!(err, LocatorError::Validation(_)));
}

#[tokio::test]
async fn tracking_validates_its_input() {
    let harness = test_service();
    assert!(matches!(
        harness.service.track_request(" ", CENTER_LAT, CENTER_LNG).await,
        Err(LocatorError::Validation(_))
    ));
    assert!(matches!(
        harness.service.track_request("r-1", -91.0, CENTER_LNG).await,
        Err(LocatorError::Validation(_))
    ));
    assert!(matches!(
        harness.service.surge_at(CENTER_LAT, f64::NAN).await,
        Err(LocatorError::Validation(_))
    ));
}
