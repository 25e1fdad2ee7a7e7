//! Shared location store: the Redis-like collaborator behind ingestion, search and surge.
//!
//! [`LocationStore`] is the seam. It offers the primitives the service needs:
//!
//! - string values with TTL (`SetEx` / [`LocationStore::get`])
//! - unordered sets with a per-key TTL (`SetAdd`, `SetRemove`, `Expire`)
//! - a geo-index with radius queries (`GeoAdd`, [`LocationStore::geo_radius`])
//! - atomic multi-command [`Pipeline`]s
//! - publish/subscribe channels
//!
//! Expiry is the store's own business; callers only ever set TTLs.

pub mod keys;
pub mod memory;

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::StoreResult;
use crate::spatial::GeoPoint;

pub use memory::MemoryStore;

/// One write inside a [`Pipeline`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    GeoAdd {
        key: String,
        member: String,
        point: GeoPoint,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
    SetEx {
        key: String,
        value: String,
        ttl: Duration,
    },
    Delete {
        key: String,
    },
}

/// Ordered batch of writes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    commands: Vec<StoreCommand>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn geo_add(mut self, key: impl Into<String>, member: impl Into<String>, point: GeoPoint) -> Self {
        self.commands.push(StoreCommand::GeoAdd {
            key: key.into(),
            member: member.into(),
            point,
        });
        self
    }

    pub fn set_add(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.commands.push(StoreCommand::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn set_remove(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.commands.push(StoreCommand::SetRemove {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.commands.push(StoreCommand::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn set_ex(mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        self.commands.push(StoreCommand::SetEx {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.commands.push(StoreCommand::Delete { key: key.into() });
        self
    }

    pub fn commands(&self) -> &[StoreCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn into_commands(self) -> Vec<StoreCommand> {
        self.commands
    }
}

/// A geo-index member returned by a radius query.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMember {
    pub member: String,
    pub point: GeoPoint,
    pub distance_km: f64,
}

/// Trait for store backends. Implementations must be `Send + Sync` so one client can
/// be shared by every concurrent request handler.
pub trait LocationStore: Send + Sync + 'static {
    /// Apply every command of the pipeline, or none of them.
    fn execute(&self, pipeline: Pipeline) -> impl Future<Output = StoreResult<()>> + Send;

    /// Live string value, `None` when missing or expired.
    fn get(&self, key: &str) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    /// Batched [`LocationStore::get`], one slot per key in input order.
    fn get_many(&self, keys: &[String]) -> impl Future<Output = StoreResult<Vec<Option<String>>>> + Send;

    fn set_members(&self, key: &str) -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    /// Distinct members across every listed set.
    fn set_union(&self, keys: &[String]) -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    fn set_card(&self, key: &str) -> impl Future<Output = StoreResult<usize>> + Send;

    /// Geo-index members within `radius_km` of `center`, nearest first.
    fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius_km: f64,
    ) -> impl Future<Output = StoreResult<Vec<GeoMember>>> + Send;

    /// Deliver `payload` to current subscribers of `channel`; returns how many received it.
    fn publish(&self, channel: &str, payload: String) -> impl Future<Output = StoreResult<usize>> + Send;

    fn subscribe(&self, channel: &str) -> impl Future<Output = StoreResult<broadcast::Receiver<String>>> + Send;
}
