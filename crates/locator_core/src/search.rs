//! Nearby search over the cell membership index.
//!
//! Membership sets are refreshed but never pruned when an agent moves or goes offline,
//! so every candidate is re-checked against its live record before it is returned.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{LocatorError, LocatorResult};
use crate::ingest::load_agent_records;
use crate::model::{AgentLocation, NearbyAgent, NearbyResult};
use crate::spatial::{haversine_km, CellIndexer, GeoPoint};
use crate::store::keys::{cell_members_key, GEO_INDEX_KEY};
use crate::store::LocationStore;
use crate::telemetry::LocatorTelemetry;

/// Floor applied to every ETA estimate.
pub const MIN_ETA_SECS: f64 = 60.0;

/// Detour and stop allowance over straight-line travel time.
const ETA_BUFFER: f64 = 1.2;

/// Average urban speed in m/s for a vehicle class.
pub fn class_speed_mps(vehicle_class: &str) -> f64 {
    match vehicle_class {
        "bike" => 8.0,
        "tricycle" => 6.0,
        _ => 10.0,
    }
}

/// Straight-line ETA in whole seconds, never below one minute.
pub fn estimate_eta_secs(distance_km: f64, vehicle_class: &str) -> u64 {
    let secs = distance_km * 1000.0 / class_speed_mps(vehicle_class) * ETA_BUFFER;
    secs.max(MIN_ETA_SECS) as u64
}

/// Search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_class: Option<String>,
}

impl NearbyQuery {
    pub fn new(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_km,
            vehicle_class: None,
        }
    }

    pub fn with_vehicle_class(mut self, vehicle_class: impl Into<String>) -> Self {
        self.vehicle_class = Some(vehicle_class.into());
        self
    }

    /// Validated query point. A zero radius is allowed and only matches exact positions.
    pub fn validate(&self) -> LocatorResult<GeoPoint> {
        if !self.radius_km.is_finite() || self.radius_km < 0.0 {
            return Err(LocatorError::validation(format!(
                "radius_km must be a non-negative number, got {}",
                self.radius_km
            )));
        }
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Class filter; a blank class means no filter.
    pub fn class_filter(&self) -> Option<&str> {
        self.vehicle_class
            .as_deref()
            .map(str::trim)
            .filter(|class| !class.is_empty())
    }
}

pub struct NearbySearch<S> {
    store: Arc<S>,
    indexer: Arc<CellIndexer>,
    ring_k: u32,
    telemetry: Arc<LocatorTelemetry>,
}

impl<S: LocationStore> NearbySearch<S> {
    pub fn new(store: Arc<S>, indexer: Arc<CellIndexer>, ring_k: u32, telemetry: Arc<LocatorTelemetry>) -> Self {
        Self {
            store,
            indexer,
            ring_k,
            telemetry,
        }
    }

    /// Available agents within `radius_km` of the query point, nearest first.
    ///
    /// Candidates come from the membership sets of the fine cell's `ring_k` neighbourhood,
    /// so a radius wider than that neighbourhood is silently bounded by it.
    pub async fn find_nearby(&self, query: &NearbyQuery) -> LocatorResult<NearbyResult> {
        let center = query.validate()?;
        let origin = self.indexer.fine_cell(center);
        let ring = self.indexer.ring_of(origin, self.ring_k);

        let ring_cells: HashSet<String> = ring.iter().map(ToString::to_string).collect();
        let member_keys: Vec<String> = ring.iter().map(|cell| cell_members_key(cell)).collect();
        let candidates = self.store.set_union(&member_keys).await?;
        let records = load_agent_records(self.store.as_ref(), &candidates).await?;

        let result = rank(center, query, records, |record| ring_cells.contains(&record.cell_id));
        self.telemetry.record_search();
        tracing::debug!(
            cell = %origin,
            candidates = candidates.len(),
            matched = result.count,
            "nearby search"
        );
        Ok(result)
    }

    /// Same filters and ordering as [`NearbySearch::find_nearby`], but candidates come from
    /// the continuous geo-index instead of the cell sets.
    pub async fn find_nearby_by_radius(&self, query: &NearbyQuery) -> LocatorResult<NearbyResult> {
        let center = query.validate()?;
        let members = self
            .store
            .geo_radius(GEO_INDEX_KEY, center, query.radius_km)
            .await?;
        let candidates: Vec<String> = members.into_iter().map(|m| m.member).collect();
        let records = load_agent_records(self.store.as_ref(), &candidates).await?;

        let result = rank(center, query, records, |_| true);
        self.telemetry.record_search();
        tracing::debug!(candidates = candidates.len(), matched = result.count, "geo-index search");
        Ok(result)
    }
}

/// Filter live records and sort the survivors by distance from `center`.
fn rank<F>(center: GeoPoint, query: &NearbyQuery, records: Vec<AgentLocation>, in_scope: F) -> NearbyResult
where
    F: Fn(&AgentLocation) -> bool,
{
    let class = query.class_filter();
    let mut hits: Vec<NearbyAgent> = records
        .into_iter()
        .filter(|record| record.available && in_scope(record))
        .filter(|record| class.map_or(true, |class| record.vehicle_class == class))
        .filter_map(|record| {
            let position = record.position().ok()?;
            let distance_km = haversine_km(center, position);
            (distance_km <= query.radius_km).then(|| NearbyAgent {
                eta_secs: estimate_eta_secs(distance_km, &record.vehicle_class),
                location: record,
                distance_km,
            })
        })
        .collect();
    hits.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    NearbyResult::new(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_has_a_one_minute_floor() {
        assert_eq!(estimate_eta_secs(0.0, "sedan"), 60);
        assert_eq!(estimate_eta_secs(0.1, "bike"), 60);
    }

    #[test]
    fn eta_scales_with_class_speed() {
        // 3 km at 10 m/s is 300 s, plus the 20% allowance.
        assert_eq!(estimate_eta_secs(3.0, "sedan"), 360);
        assert_eq!(estimate_eta_secs(3.0, "bike"), 450);
        assert_eq!(estimate_eta_secs(3.0, "tricycle"), 600);
        assert_eq!(estimate_eta_secs(3.0, "hovercraft"), 360);
    }

    #[test]
    fn query_validation() {
        assert!(NearbyQuery::new(-1.29, 36.82, 3.0).validate().is_ok());
        assert!(NearbyQuery::new(-1.29, 36.82, 0.0).validate().is_ok());
        assert!(NearbyQuery::new(-1.29, 36.82, -1.0).validate().is_err());
        assert!(NearbyQuery::new(-1.29, 36.82, f64::NAN).validate().is_err());
        assert!(NearbyQuery::new(-1.29, 181.0, 3.0).validate().is_err());
    }

    #[test]
    fn blank_class_is_no_filter() {
        let query = NearbyQuery::new(0.0, 0.0, 1.0).with_vehicle_class("  ");
        assert_eq!(query.class_filter(), None);
        let query = NearbyQuery::new(0.0, 0.0, 1.0).with_vehicle_class("bike");
        assert_eq!(query.class_filter(), Some("bike"));
    }
}
