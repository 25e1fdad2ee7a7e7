//! Surge pricing over coarse cells.
//!
//! Demand is the set of live demand markers per zone. Supply reuses the fine-resolution
//! membership sets written by ingestion, read through the children of each coarse zone.
//! Computed zones are cached in the store with their own TTL.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use h3o::CellIndex;

use crate::error::{LocatorError, LocatorResult, StoreError};
use crate::ingest::load_agent_records;
use crate::model::{DemandMarker, SurgeZone, SurgedFare};
use crate::spatial::{CellIndexer, GeoPoint};
use crate::store::keys::{cell_members_key, demand_marker_key, surge_zone_key, zone_requests_key};
use crate::store::{LocationStore, Pipeline};
use crate::telemetry::LocatorTelemetry;

pub const MIN_MULTIPLIER: f64 = 1.0;
pub const MAX_MULTIPLIER: f64 = 3.0;

/// Multiplier for a demand/supply balance.
///
/// No supply means maximum surge. Otherwise the demand/supply ratio maps onto a
/// piecewise-linear curve that is flat up to 0.5 and capped at [`MAX_MULTIPLIER`].
pub fn surge_multiplier(demand: usize, supply: usize) -> f64 {
    if supply == 0 {
        return MAX_MULTIPLIER;
    }
    let ratio = demand as f64 / supply as f64;
    let multiplier = if ratio <= 0.5 {
        MIN_MULTIPLIER
    } else if ratio <= 1.0 {
        1.0 + (ratio - 0.5) * 0.5
    } else if ratio <= 2.0 {
        1.25 + (ratio - 1.0) * 0.5
    } else if ratio <= 3.0 {
        1.75 + (ratio - 2.0) * 0.5
    } else {
        2.25 + (ratio - 3.0) * 0.25
    };
    multiplier.min(MAX_MULTIPLIER)
}

/// Tunables for [`SurgeEngine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurgeSettings {
    /// Neighbourhood aggregated into one zone's demand and supply.
    pub ring_k: u32,
    /// Largest `k` accepted by [`SurgeEngine::surge_zones`].
    pub max_zones_k: u32,
    pub cache_ttl: Duration,
    pub demand_ttl: Duration,
}

pub struct SurgeEngine<S> {
    store: Arc<S>,
    indexer: Arc<CellIndexer>,
    settings: SurgeSettings,
    telemetry: Arc<LocatorTelemetry>,
}

impl<S: LocationStore> SurgeEngine<S> {
    pub fn new(
        store: Arc<S>,
        indexer: Arc<CellIndexer>,
        settings: SurgeSettings,
        telemetry: Arc<LocatorTelemetry>,
    ) -> Self {
        Self {
            store,
            indexer,
            settings,
            telemetry,
        }
    }

    /// Surge multiplier at a point.
    pub async fn surge_at(&self, lat: f64, lng: f64) -> LocatorResult<f64> {
        Ok(self.zone_at(lat, lng).await?.multiplier)
    }

    /// Full zone state for the coarse cell containing the point.
    pub async fn zone_at(&self, lat: f64, lng: f64) -> LocatorResult<SurgeZone> {
        let point = GeoPoint::new(lat, lng)?;
        self.zone(self.indexer.coarse_cell(point)).await
    }

    /// One zone per coarse cell within `k` steps of the point's zone.
    pub async fn surge_zones(&self, lat: f64, lng: f64, k: u32) -> LocatorResult<Vec<SurgeZone>> {
        if k > self.settings.max_zones_k {
            return Err(LocatorError::validation(format!(
                "k must be at most {}, got {k}",
                self.settings.max_zones_k
            )));
        }
        let point = GeoPoint::new(lat, lng)?;
        let cells = self.indexer.ring_of(self.indexer.coarse_cell(point), k);
        let mut zones = Vec::with_capacity(cells.len());
        for cell in cells {
            zones.push(self.zone(cell).await?);
        }
        Ok(zones)
    }

    /// Base fare scaled by the multiplier at the point.
    pub async fn surged_fare(&self, lat: f64, lng: f64, base_fare: f64) -> LocatorResult<SurgedFare> {
        if !base_fare.is_finite() || base_fare < 0.0 {
            return Err(LocatorError::validation(format!(
                "base_fare must be a non-negative number, got {base_fare}"
            )));
        }
        let multiplier = self.surge_at(lat, lng).await?;
        Ok(SurgedFare {
            fare: base_fare * multiplier,
            multiplier,
        })
    }

    /// Register an active request as demand in the zone containing the point. Tracking
    /// the same request again moves it to the new zone.
    pub async fn track_request(&self, request_id: &str, lat: f64, lng: f64) -> LocatorResult<DemandMarker> {
        if request_id.trim().is_empty() {
            return Err(LocatorError::validation("request_id cannot be empty"));
        }
        let point = GeoPoint::new(lat, lng)?;
        let cell = self.indexer.coarse_cell(point);
        let marker = DemandMarker {
            request_id: request_id.to_string(),
            cell_id: cell.to_string(),
            created_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&marker).map_err(StoreError::from)?;

        let zone_key = zone_requests_key(cell);
        let pipeline = Pipeline::new()
            .set_ex(demand_marker_key(request_id), encoded, self.settings.demand_ttl)
            .set_add(zone_key.clone(), request_id)
            .expire(zone_key, self.settings.demand_ttl);
        self.store.execute(pipeline).await?;

        tracing::debug!(request_id, zone = %cell, "demand tracked");
        Ok(marker)
    }

    /// Drop a request's demand marker. Returns `false` when no live marker existed.
    pub async fn untrack_request(&self, request_id: &str) -> LocatorResult<bool> {
        if request_id.trim().is_empty() {
            return Err(LocatorError::validation("request_id cannot be empty"));
        }
        let marker_key = demand_marker_key(request_id);
        let Some(raw) = self.store.get(&marker_key).await? else {
            return Ok(false);
        };
        let marker: DemandMarker = serde_json::from_str(&raw).map_err(StoreError::from)?;
        let pipeline = Pipeline::new()
            .delete(marker_key)
            .set_remove(zone_requests_key(&marker.cell_id), request_id);
        self.store.execute(pipeline).await?;

        tracing::debug!(request_id, zone = %marker.cell_id, "demand untracked");
        Ok(true)
    }

    async fn zone(&self, cell: CellIndex) -> LocatorResult<SurgeZone> {
        let cache_key = surge_zone_key(cell);
        if let Some(raw) = self.store.get(&cache_key).await? {
            match serde_json::from_str::<SurgeZone>(&raw) {
                Ok(zone) => {
                    self.telemetry.record_surge_cache(true);
                    return Ok(zone);
                }
                Err(err) => {
                    tracing::warn!(zone = %cell, error = %err, "discarding undecodable surge cache entry");
                }
            }
        }
        self.telemetry.record_surge_cache(false);

        let zone = self.compute_zone(cell).await?;
        self.cache_zone(cache_key, &zone).await;
        Ok(zone)
    }

    async fn compute_zone(&self, cell: CellIndex) -> LocatorResult<SurgeZone> {
        let neighbourhood = self.indexer.ring_of(cell, self.settings.ring_k);
        let demand = self.count_demand(&neighbourhood).await?;
        let supply = self.count_supply(&neighbourhood).await?;
        let multiplier = surge_multiplier(demand, supply);
        tracing::debug!(zone = %cell, demand, supply, multiplier, "surge computed");
        Ok(SurgeZone {
            cell_id: cell.to_string(),
            multiplier,
            demand,
            supply,
            computed_at: Utc::now(),
        })
    }

    /// Live markers whose recorded zone is the set they were found in.
    async fn count_demand(&self, zones: &[CellIndex]) -> LocatorResult<usize> {
        let mut request_ids = Vec::new();
        let mut expected_zone = Vec::new();
        for zone in zones {
            let zone_id = zone.to_string();
            for request_id in self.store.set_members(&zone_requests_key(&zone_id)).await? {
                request_ids.push(demand_marker_key(&request_id));
                expected_zone.push(zone_id.clone());
            }
        }
        if request_ids.is_empty() {
            return Ok(0);
        }

        let markers = self.store.get_many(&request_ids).await?;
        let mut live = HashSet::new();
        for (raw, zone_id) in markers.into_iter().zip(expected_zone) {
            let Some(raw) = raw else { continue };
            match serde_json::from_str::<DemandMarker>(&raw) {
                Ok(marker) if marker.cell_id == zone_id => {
                    live.insert(marker.request_id);
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "skipping undecodable demand marker"),
            }
        }
        Ok(live.len())
    }

    /// Distinct available agents currently located in a fine child of the zones.
    async fn count_supply(&self, zones: &[CellIndex]) -> LocatorResult<usize> {
        let fine = self.indexer.fine().resolution();
        let children: HashSet<String> = zones
            .iter()
            .flat_map(|zone| self.indexer.children_of(*zone, fine))
            .map(|child| child.to_string())
            .collect();
        let member_keys: Vec<String> = children.iter().map(|child| cell_members_key(child)).collect();

        let candidates = self.store.set_union(&member_keys).await?;
        let records = load_agent_records(self.store.as_ref(), &candidates).await?;
        Ok(records
            .iter()
            .filter(|record| record.available && children.contains(&record.cell_id))
            .count())
    }

    /// Cache writes are best effort; a failure only costs a recomputation.
    async fn cache_zone(&self, key: String, zone: &SurgeZone) {
        let encoded = match serde_json::to_string(zone) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(zone = %zone.cell_id, error = %err, "surge zone encode failed");
                return;
            }
        };
        let pipeline = Pipeline::new().set_ex(key, encoded, self.settings.cache_ttl);
        if let Err(err) = self.store.execute(pipeline).await {
            tracing::warn!(zone = %zone.cell_id, error = %err, "surge cache write failed");
        }
    }
}
