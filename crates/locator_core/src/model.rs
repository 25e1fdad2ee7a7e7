//! Records exchanged with callers and persisted in the location store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LocatorError, LocatorResult};
use crate::spatial::GeoPoint;

pub type AgentId = String;
pub type RequestId = String;
pub type VehicleClass = String;

/// Caller-supplied position update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationUpdate {
    pub agent_id: AgentId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub accuracy: f64,
    pub vehicle_class: VehicleClass,
    pub available: bool,
    /// Ingestion time is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationUpdate {
    pub fn new(
        agent_id: impl Into<AgentId>,
        latitude: f64,
        longitude: f64,
        vehicle_class: impl Into<VehicleClass>,
        available: bool,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            latitude,
            longitude,
            heading: 0.0,
            speed: 0.0,
            accuracy: 0.0,
            vehicle_class: vehicle_class.into(),
            available,
            timestamp: None,
        }
    }

    pub fn with_motion(mut self, heading: f64, speed: f64, accuracy: f64) -> Self {
        self.heading = heading;
        self.speed = speed;
        self.accuracy = accuracy;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Check every field and return the validated position.
    pub fn validate(&self) -> LocatorResult<GeoPoint> {
        if self.agent_id.trim().is_empty() {
            return Err(LocatorError::validation("agent_id cannot be empty"));
        }
        if self.vehicle_class.trim().is_empty() {
            return Err(LocatorError::validation("vehicle_class cannot be empty"));
        }
        for (name, value) in [
            ("heading", self.heading),
            ("speed", self.speed),
            ("accuracy", self.accuracy),
        ] {
            if !value.is_finite() {
                return Err(LocatorError::validation(format!("{name} must be finite")));
            }
        }
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Live attribute record for one agent. Expires with the location TTL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentLocation {
    pub agent_id: AgentId,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
    pub speed: f64,
    pub accuracy: f64,
    pub vehicle_class: VehicleClass,
    pub available: bool,
    pub updated_at: DateTime<Utc>,
    /// Fine-resolution cell id.
    pub cell_id: String,
}

impl AgentLocation {
    /// Stores the vehicle class trimmed so it compares equal to a trimmed query filter.
    pub fn from_update(update: LocationUpdate, cell_id: String, now: DateTime<Utc>) -> Self {
        Self {
            updated_at: update.timestamp.unwrap_or(now),
            agent_id: update.agent_id,
            latitude: update.latitude,
            longitude: update.longitude,
            heading: update.heading,
            speed: update.speed,
            accuracy: update.accuracy,
            vehicle_class: update.vehicle_class.trim().to_string(),
            available: update.available,
            cell_id,
        }
    }

    pub fn position(&self) -> LocatorResult<GeoPoint> {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Response of a successful ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateAck {
    pub cell_id: String,
}

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NearbyAgent {
    #[serde(flatten)]
    pub location: AgentLocation,
    pub distance_km: f64,
    pub eta_secs: u64,
}

/// Search response, sorted by ascending distance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NearbyResult {
    pub count: usize,
    pub agents: Vec<NearbyAgent>,
}

impl NearbyResult {
    pub fn new(agents: Vec<NearbyAgent>) -> Self {
        Self {
            count: agents.len(),
            agents,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a.location.agent_id == agent_id)
    }
}

/// Active search-for-agent request, counted as demand in its coarse zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DemandMarker {
    pub request_id: RequestId,
    /// Coarse-resolution cell id.
    pub cell_id: String,
    pub created_at: DateTime<Utc>,
}

/// Cached surge state for one coarse cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurgeZone {
    pub cell_id: String,
    pub multiplier: f64,
    pub demand: usize,
    pub supply: usize,
    pub computed_at: DateTime<Utc>,
}

/// A base fare with the zone multiplier applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SurgedFare {
    pub fare: f64,
    pub multiplier: f64,
}
