//! Test helpers for common test setup and utilities.
//!
//! Shared fixtures for unit tests, integration tests and benchmarks: a fixed city centre,
//! offset points around it, and a fully wired in-memory service.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::LocatorConfig;
use crate::events::MemoryEventLog;
use crate::model::LocationUpdate;
use crate::service::LocationService;
use crate::spatial::{destination_point, GeoPoint};
use crate::store::MemoryStore;

/// Nairobi CBD, the reference point used across tests.
pub const CENTER_LAT: f64 = -1.2921;
pub const CENTER_LNG: f64 = 36.8219;

/// # Panics
///
/// Panics if the reference constants are invalid (should never happen).
pub fn center() -> GeoPoint {
    GeoPoint::new(CENTER_LAT, CENTER_LNG).expect("center should be a valid coordinate")
}

/// A point `distance_km` away from the centre along `bearing_deg`.
///
/// # Panics
///
/// Panics if the destination cannot be represented (should never happen near the equator).
pub fn offset(distance_km: f64, bearing_deg: f64) -> GeoPoint {
    destination_point(center(), distance_km, bearing_deg).expect("offset point should be valid")
}

/// Update for an agent placed at `point`.
pub fn update_at(agent_id: &str, point: GeoPoint, vehicle_class: &str, available: bool) -> LocationUpdate {
    LocationUpdate::new(agent_id, point.lat(), point.lng(), vehicle_class, available)
}

/// In-memory service plus handles to its store, event log and writer task.
pub struct TestService {
    pub service: LocationService<MemoryStore>,
    pub store: Arc<MemoryStore>,
    pub log: Arc<MemoryEventLog>,
    pub writer: JoinHandle<()>,
}

/// Must be called from inside a tokio runtime.
pub fn test_service() -> TestService {
    test_service_with(&LocatorConfig::default())
}

pub fn test_service_with(config: &LocatorConfig) -> TestService {
    let store = Arc::new(MemoryStore::new());
    let log = Arc::new(MemoryEventLog::new());
    let (service, writer) = LocationService::with_event_log(Arc::clone(&store), Arc::clone(&log), config);
    TestService {
        service,
        store,
        log,
        writer,
    }
}

/// Place `count` available agents on a circle of `radius_km` around the centre, evenly
/// spaced by bearing. Ids are `{prefix}-{i}`.
///
/// # Panics
///
/// Panics if any update is rejected.
pub async fn seed_ring(
    service: &LocationService<MemoryStore>,
    prefix: &str,
    count: usize,
    radius_km: f64,
    vehicle_class: &str,
) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let bearing = 360.0 * i as f64 / count.max(1) as f64;
        let id = format!("{prefix}-{i}");
        service
            .update_location(update_at(&id, offset(radius_km, bearing), vehicle_class, true))
            .await
            .expect("seed update should succeed");
        ids.push(id);
    }
    ids
}
