mod support;

use std::sync::Arc;
use std::time::Duration;

use locator_core::events::MemoryEventLog;
use locator_core::test_helpers::{center, update_at, CENTER_LAT, CENTER_LNG};
use locator_core::{LocationService, LocatorConfig, LocatorError, NearbyQuery};

use support::FlakyStore;

struct Harness {
    service: LocationService<FlakyStore>,
    store: Arc<FlakyStore>,
    log: Arc<MemoryEventLog>,
    writer: tokio::task::JoinHandle<()>,
}

fn harness() -> Harness {
    let store = Arc::new(FlakyStore::new());
    let log = Arc::new(MemoryEventLog::new());
    let (service, writer) =
        LocationService::with_event_log(Arc::clone(&store), Arc::clone(&log), &LocatorConfig::default());
    Harness {
        service,
        store,
        log,
        writer,
    }
}

#[tokio::test]
async fn failed_write_is_a_transient_error() {
    let h = harness();
    h.store.fail_writes(true);

    let err = h
        .service
        .update_location(update_at("d-1", center(), "sedan", true))
        .await
        .expect_err("store down");
    assert!(matches!(err, LocatorError::StoreUnavailable(_)));
    assert!(err.is_transient());

    h.store.fail_writes(false);
    assert!(matches!(
        h.service.get_location("d-1").await,
        Err(LocatorError::NotFound(_))
    ));
    assert_eq!(h.store.inner().key_count(), 0);
}

#[tokio::test]
async fn failed_reads_surface_from_search_and_surge() {
    let h = harness();
    h.service
        .update_location(update_at("d-1", center(), "sedan", true))
        .await
        .expect("update");
    h.store.fail_reads(true);

    let search = h
        .service
        .find_nearby(&NearbyQuery::new(CENTER_LAT, CENTER_LNG, 1.0))
        .await
        .expect_err("search");
    assert!(matches!(search, LocatorError::StoreUnavailable(_)));

    let surge = h.service.surge_at(CENTER_LAT, CENTER_LNG).await.expect_err("surge");
    assert!(surge.is_transient());

    let lookup = h.service.get_location("d-1").await.expect_err("lookup");
    assert!(matches!(lookup, LocatorError::StoreUnavailable(_)));
}

#[tokio::test(start_paused = true)]
async fn slow_store_hits_the_deadline() {
    let h = harness();
    h.store.delay(Duration::from_secs(2));

    let err = h
        .service
        .update_location(update_at("d-1", center(), "sedan", true))
        .await
        .expect_err("too slow");
    assert!(matches!(err, LocatorError::DeadlineExceeded(d) if d == h.service.default_deadline()));

    let err = h
        .service
        .find_nearby_within(&NearbyQuery::new(CENTER_LAT, CENTER_LNG, 1.0), Duration::from_millis(10))
        .await
        .expect_err("too slow");
    assert!(matches!(err, LocatorError::DeadlineExceeded(d) if d == Duration::from_millis(10)));
    assert!(err.is_transient());

    let ack = h
        .service
        .update_location_within(update_at("d-1", center(), "sedan", true), Duration::from_secs(5))
        .await
        .expect("generous deadline");
    assert!(!ack.cell_id.is_empty());
}

#[tokio::test]
async fn publish_failure_does_not_fail_ingestion() {
    let h = harness();
    h.store.fail_publish(true);

    h.service
        .update_location(update_at("d-1", center(), "sedan", true))
        .await
        .expect("update despite publish failure");
    support::settle().await;

    let telemetry = h.service.telemetry();
    assert_eq!(telemetry.publish_failures, 1);
    assert_eq!(telemetry.updates_ingested, 1);
    assert!(h.service.get_location("d-1").await.is_ok());
}

#[tokio::test]
async fn event_log_failure_does_not_fail_ingestion() {
    let h = harness();
    h.log.set_failing(true);

    for id in ["d-1", "d-2"] {
        h.service
            .update_location(update_at(id, center(), "sedan", true))
            .await
            .expect("update despite log failure");
    }
    support::settle().await;
    let telemetry = h.service.telemetry();
    assert_eq!(telemetry.updates_ingested, 2);
    assert_eq!(telemetry.forwards_queued, 2);

    drop(h.service);
    h.writer.await.expect("writer drained");
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn failed_appends_are_counted() {
    let h = harness();
    h.log.set_failing(true);
    h.service
        .update_location(update_at("d-1", center(), "sedan", true))
        .await
        .expect("update");

    for _ in 0..16 {
        if h.service.telemetry().forward_failures == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(h.service.telemetry().forward_failures, 1);
    assert_eq!(h.service.telemetry().soft_failures(), 1);
}

#[tokio::test]
async fn surge_cache_write_failure_is_soft() {
    let h = harness();
    h.store.fail_writes(true);

    let multiplier = h
        .service
        .surge_at(CENTER_LAT, CENTER_LNG)
        .await
        .expect("computed without caching");
    assert_eq!(multiplier, 3.0);
    assert_eq!(h.service.telemetry().surge_cache_misses, 1);
}
