//! Location ingestion: one atomic store batch per update, then best-effort fan-out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::{LocatorError, LocatorResult, StoreError, StoreResult};
use crate::events::EventForwarder;
use crate::model::{AgentLocation, LocationUpdate, UpdateAck};
use crate::spatial::CellIndexer;
use crate::store::keys::{
    agent_channel, agent_record_key, cell_members_key, AVAILABLE_AGENTS_KEY, GEO_INDEX_KEY,
};
use crate::store::{LocationStore, Pipeline};
use crate::telemetry::LocatorTelemetry;

pub struct LocationIngestor<S> {
    store: Arc<S>,
    indexer: Arc<CellIndexer>,
    forwarder: EventForwarder,
    telemetry: Arc<LocatorTelemetry>,
    location_ttl: Duration,
}

impl<S: LocationStore> LocationIngestor<S> {
    pub fn new(
        store: Arc<S>,
        indexer: Arc<CellIndexer>,
        forwarder: EventForwarder,
        telemetry: Arc<LocatorTelemetry>,
        location_ttl: Duration,
    ) -> Self {
        Self {
            store,
            indexer,
            forwarder,
            telemetry,
            location_ttl,
        }
    }

    /// Record a position update.
    ///
    /// Geo-index upsert, membership changes and the attribute record are written as one
    /// pipeline; a store failure there is returned. Publishing to subscribers and
    /// forwarding to the event log happen afterwards and never fail the call.
    pub async fn update_location(&self, update: LocationUpdate) -> LocatorResult<UpdateAck> {
        let point = update.validate()?;
        let cell = self.indexer.fine_cell(point);
        let cell_id = cell.to_string();
        let record = AgentLocation::from_update(update, cell_id.clone(), Utc::now());
        let encoded = serde_json::to_string(&record).map_err(StoreError::from)?;

        let agent_id = record.agent_id.as_str();
        let mut pipeline = Pipeline::new().geo_add(GEO_INDEX_KEY, agent_id, point);
        pipeline = if record.available {
            let members = cell_members_key(cell);
            pipeline
                .set_add(members.clone(), agent_id)
                .expire(members, self.location_ttl)
                .set_add(AVAILABLE_AGENTS_KEY, agent_id)
                .expire(AVAILABLE_AGENTS_KEY, self.location_ttl)
        } else {
            pipeline.set_remove(AVAILABLE_AGENTS_KEY, agent_id)
        };
        pipeline = pipeline.set_ex(agent_record_key(agent_id), encoded.clone(), self.location_ttl);

        self.store.execute(pipeline).await?;
        self.telemetry.record_update();
        tracing::debug!(
            agent_id = %record.agent_id,
            cell = %cell_id,
            available = record.available,
            "location updated"
        );

        if record.available {
            self.spawn_publish(agent_channel(&record.agent_id), encoded);
        }
        self.forwarder.forward(&record);

        Ok(UpdateAck { cell_id })
    }

    fn spawn_publish(&self, channel: String, payload: String) {
        let store = Arc::clone(&self.store);
        let telemetry = Arc::clone(&self.telemetry);
        tokio::spawn(async move {
            match store.publish(&channel, payload).await {
                Ok(0) => {}
                Ok(_) => telemetry.record_publish_delivered(),
                Err(err) => {
                    telemetry.record_publish_failure();
                    tracing::warn!(channel = %channel, error = %err, "location publish failed");
                }
            }
        });
    }

    /// Live record for one agent.
    pub async fn get_location(&self, agent_id: &str) -> LocatorResult<AgentLocation> {
        if agent_id.trim().is_empty() {
            return Err(LocatorError::validation("agent_id cannot be empty"));
        }
        let Some(raw) = self.store.get(&agent_record_key(agent_id)).await? else {
            tracing::debug!(agent_id, "no live location");
            return Err(LocatorError::NotFound(agent_id.to_string()));
        };
        let record = serde_json::from_str(&raw).map_err(StoreError::from)?;
        Ok(record)
    }

    /// Stream of records published for `agent_id` from now on.
    pub async fn subscribe(&self, agent_id: &str) -> LocatorResult<LocationSubscription> {
        if agent_id.trim().is_empty() {
            return Err(LocatorError::validation("agent_id cannot be empty"));
        }
        let rx = self.store.subscribe(&agent_channel(agent_id)).await?;
        Ok(LocationSubscription {
            agent_id: agent_id.to_string(),
            rx,
        })
    }
}

/// Receiver side of an agent's update channel.
pub struct LocationSubscription {
    agent_id: String,
    rx: broadcast::Receiver<String>,
}

impl LocationSubscription {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Next published record, or `None` once the channel is gone. Messages missed by a
    /// slow receiver are skipped.
    pub async fn next(&mut self) -> Option<AgentLocation> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => match serde_json::from_str(&payload) {
                    Ok(record) => return Some(record),
                    Err(err) => {
                        tracing::warn!(agent_id = %self.agent_id, error = %err, "undecodable location event");
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(agent_id = %self.agent_id, skipped, "subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Fetch and decode the live records for `agent_ids`, in input order. Missing records are
/// skipped, as are records that no longer decode.
pub(crate) async fn load_agent_records<S: LocationStore>(
    store: &S,
    agent_ids: &[String],
) -> StoreResult<Vec<AgentLocation>> {
    if agent_ids.is_empty() {
        return Ok(Vec::new());
    }
    let keys: Vec<String> = agent_ids.iter().map(|id| agent_record_key(id)).collect();
    let values = store.get_many(&keys).await?;

    let mut records = Vec::with_capacity(values.len());
    for (agent_id, raw) in agent_ids.iter().zip(values) {
        let Some(raw) = raw else { continue };
        match serde_json::from_str::<AgentLocation>(&raw) {
            Ok(record) => records.push(record),
            Err(err) => tracing::warn!(agent_id = %agent_id, error = %err, "skipping undecodable agent record"),
        }
    }
    Ok(records)
}
