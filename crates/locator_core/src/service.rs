//! Service facade wiring ingestion, search and surge onto one shared store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::LocatorConfig;
use crate::error::{LocatorError, LocatorResult};
use crate::events::{EventForwarder, EventLog};
use crate::ingest::{LocationIngestor, LocationSubscription};
use crate::model::{AgentLocation, DemandMarker, LocationUpdate, NearbyResult, SurgeZone, SurgedFare, UpdateAck};
use crate::search::{NearbyQuery, NearbySearch};
use crate::spatial::CellIndexer;
use crate::store::LocationStore;
use crate::surge::{SurgeEngine, SurgeSettings};
use crate::telemetry::{LocatorTelemetry, TelemetrySnapshot};

/// Every store-backed operation runs under a deadline: the configured default, or the
/// caller's own through the `*_within` variants.
pub struct LocationService<S> {
    ingestor: LocationIngestor<S>,
    search: NearbySearch<S>,
    surge: SurgeEngine<S>,
    telemetry: Arc<LocatorTelemetry>,
    deadline: Duration,
    surge_ring_k: u32,
}

impl<S: LocationStore> LocationService<S> {
    pub fn new(
        store: Arc<S>,
        forwarder: EventForwarder,
        telemetry: Arc<LocatorTelemetry>,
        config: &LocatorConfig,
    ) -> Self {
        let indexer = Arc::new(CellIndexer::new(
            config.match_resolution,
            config.surge_resolution,
            config.ring_cache_capacity,
        ));
        let ingestor = LocationIngestor::new(
            Arc::clone(&store),
            Arc::clone(&indexer),
            forwarder,
            Arc::clone(&telemetry),
            config.location_ttl,
        );
        let search = NearbySearch::new(
            Arc::clone(&store),
            Arc::clone(&indexer),
            config.match_ring_k,
            Arc::clone(&telemetry),
        );
        let surge = SurgeEngine::new(
            store,
            indexer,
            SurgeSettings {
                ring_k: config.surge_ring_k,
                max_zones_k: config.max_zone_ring_k,
                cache_ttl: config.surge_cache_ttl,
                demand_ttl: config.demand_ttl,
            },
            Arc::clone(&telemetry),
        );
        Self {
            ingestor,
            search,
            surge,
            telemetry,
            deadline: config.store_deadline,
            surge_ring_k: config.surge_ring_k,
        }
    }

    /// Build the service together with its event-log writer task.
    pub fn with_event_log<L: EventLog>(store: Arc<S>, log: Arc<L>, config: &LocatorConfig) -> (Self, JoinHandle<()>) {
        let telemetry = Arc::new(LocatorTelemetry::new());
        let (forwarder, writer) = EventForwarder::spawn(log, config.forward_queue_capacity, Arc::clone(&telemetry));
        (Self::new(store, forwarder, telemetry, config), writer)
    }

    pub fn default_deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn update_location(&self, update: LocationUpdate) -> LocatorResult<UpdateAck> {
        self.update_location_within(update, self.deadline).await
    }

    pub async fn update_location_within(&self, update: LocationUpdate, deadline: Duration) -> LocatorResult<UpdateAck> {
        bounded(deadline, self.ingestor.update_location(update)).await
    }

    pub async fn get_location(&self, agent_id: &str) -> LocatorResult<AgentLocation> {
        bounded(self.deadline, self.ingestor.get_location(agent_id)).await
    }

    pub async fn subscribe(&self, agent_id: &str) -> LocatorResult<LocationSubscription> {
        bounded(self.deadline, self.ingestor.subscribe(agent_id)).await
    }

    pub async fn find_nearby(&self, query: &NearbyQuery) -> LocatorResult<NearbyResult> {
        self.find_nearby_within(query, self.deadline).await
    }

    pub async fn find_nearby_within(&self, query: &NearbyQuery, deadline: Duration) -> LocatorResult<NearbyResult> {
        bounded(deadline, self.search.find_nearby(query)).await
    }

    pub async fn find_nearby_by_radius(&self, query: &NearbyQuery) -> LocatorResult<NearbyResult> {
        bounded(self.deadline, self.search.find_nearby_by_radius(query)).await
    }

    pub async fn surge_at(&self, lat: f64, lng: f64) -> LocatorResult<f64> {
        bounded(self.deadline, self.surge.surge_at(lat, lng)).await
    }

    pub async fn surge_zone_at(&self, lat: f64, lng: f64) -> LocatorResult<SurgeZone> {
        bounded(self.deadline, self.surge.zone_at(lat, lng)).await
    }

    /// Zones within `k` steps; `None` uses the configured aggregation ring.
    pub async fn surge_zones(&self, lat: f64, lng: f64, k: Option<u32>) -> LocatorResult<Vec<SurgeZone>> {
        let k = k.unwrap_or(self.surge_ring_k);
        bounded(self.deadline, self.surge.surge_zones(lat, lng, k)).await
    }

    pub async fn surged_fare(&self, lat: f64, lng: f64, base_fare: f64) -> LocatorResult<SurgedFare> {
        bounded(self.deadline, self.surge.surged_fare(lat, lng, base_fare)).await
    }

    pub async fn track_request(&self, request_id: &str, lat: f64, lng: f64) -> LocatorResult<DemandMarker> {
        bounded(self.deadline, self.surge.track_request(request_id, lat, lng)).await
    }

    pub async fn untrack_request(&self, request_id: &str) -> LocatorResult<bool> {
        bounded(self.deadline, self.surge.untrack_request(request_id)).await
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }
}

/// Run `operation` under `deadline`. Nothing is rolled back on timeout.
async fn bounded<T, F>(deadline: Duration, operation: F) -> LocatorResult<T>
where
    F: Future<Output = LocatorResult<T>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline_ms = deadline.as_millis() as u64, "store deadline exceeded");
            Err(LocatorError::DeadlineExceeded(deadline))
        }
    }
}
