//! In-process [`LocationStore`] with Redis-like semantics.
//!
//! Keys live in one keyspace guarded by a read/write lock, so a pipeline is applied
//! atomically with respect to readers. TTLs use the tokio clock: an entry past its
//! deadline reads as missing immediately, and is physically dropped by the next write to
//! that key or by the optional reaper task.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{GeoMember, LocationStore, Pipeline, StoreCommand};
use crate::error::{StoreError, StoreResult};
use crate::spatial::{haversine_km, GeoPoint};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    Set,
    Geo,
}

#[derive(Debug)]
enum Value {
    Text(String),
    Set(HashSet<String>),
    Geo(HashMap<String, GeoPoint>),
}

impl Value {
    fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Set(_) => ValueKind::Set,
            Value::Geo(_) => ValueKind::Geo,
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn live(&self, key: &str, now: Instant) -> Option<&Value> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| &entry.value)
    }

    fn drop_if_expired(&mut self, key: &str, now: Instant) {
        if self.entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.entries.remove(key);
        }
    }

    fn entry_or_insert(&mut self, key: String, now: Instant, make: fn() -> Value) -> &mut Entry {
        self.drop_if_expired(&key, now);
        self.entries.entry(key).or_insert_with(|| Entry {
            value: make(),
            expires_at: None,
        })
    }

    /// Reject the whole pipeline if any command would hit a key of the wrong kind,
    /// accounting for kinds changed by earlier commands in the same pipeline.
    fn check(&self, commands: &[StoreCommand], now: Instant) -> StoreResult<()> {
        let mut pending: HashMap<&str, Option<ValueKind>> = HashMap::new();
        for command in commands {
            let (key, required, produces) = match command {
                StoreCommand::GeoAdd { key, .. } => (key, Some(ValueKind::Geo), Some(Some(ValueKind::Geo))),
                StoreCommand::SetAdd { key, .. } => (key, Some(ValueKind::Set), Some(Some(ValueKind::Set))),
                StoreCommand::SetRemove { key, .. } => (key, Some(ValueKind::Set), None),
                StoreCommand::Expire { key, .. } => (key, None, None),
                StoreCommand::SetEx { key, .. } => (key, None, Some(Some(ValueKind::Text))),
                StoreCommand::Delete { key } => (key, None, Some(None)),
            };
            let current = match pending.get(key.as_str()) {
                Some(kind) => *kind,
                None => self.live(key, now).map(Value::kind),
            };
            if let (Some(required), Some(current)) = (required, current) {
                if required != current {
                    return Err(StoreError::WrongType(key.clone()));
                }
            }
            if let Some(kind) = produces {
                pending.insert(key.as_str(), kind);
            }
        }
        Ok(())
    }

    fn apply(&mut self, command: StoreCommand, now: Instant) {
        match command {
            StoreCommand::GeoAdd { key, member, point } => {
                let entry = self.entry_or_insert(key, now, || Value::Geo(HashMap::new()));
                if let Value::Geo(points) = &mut entry.value {
                    points.insert(member, point);
                }
            }
            StoreCommand::SetAdd { key, member } => {
                let entry = self.entry_or_insert(key, now, || Value::Set(HashSet::new()));
                if let Value::Set(members) = &mut entry.value {
                    members.insert(member);
                }
            }
            StoreCommand::SetRemove { key, member } => {
                self.drop_if_expired(&key, now);
                let emptied = match self.entries.get_mut(&key) {
                    Some(Entry {
                        value: Value::Set(members),
                        ..
                    }) => {
                        members.remove(&member);
                        members.is_empty()
                    }
                    _ => false,
                };
                if emptied {
                    self.entries.remove(&key);
                }
            }
            StoreCommand::Expire { key, ttl } => {
                self.drop_if_expired(&key, now);
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.expires_at = Some(now + ttl);
                }
            }
            StoreCommand::SetEx { key, value, ttl } => {
                self.entries.insert(
                    key,
                    Entry {
                        value: Value::Text(value),
                        expires_at: Some(now + ttl),
                    },
                );
            }
            StoreCommand::Delete { key } => {
                self.entries.remove(&key);
            }
        }
    }
}

/// Shared in-memory store. Construct once and pass the `Arc` to every component.
#[derive(Debug)]
pub struct MemoryStore {
    keyspace: RwLock<Keyspace>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    channel_capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// `capacity` bounds how many unread events a slow subscriber may lag behind.
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            keyspace: RwLock::new(Keyspace::default()),
            channels: Mutex::new(HashMap::new()),
            channel_capacity: capacity.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Keyspace> {
        self.keyspace.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Keyspace> {
        self.keyspace.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.read()
            .entries
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Remaining time to live for `key`, `None` when missing, expired or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.read()
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .and_then(|at| at.checked_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
    }

    /// Physically drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut keyspace = self.write();
        let before = keyspace.entries.len();
        keyspace.entries.retain(|_, entry| entry.is_live(now));
        before - keyspace.entries.len()
    }

    /// Spawn a background task purging expired keys every `every`. The task stops once
    /// the last strong reference to the store is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "expired keys purged");
                }
            }
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationStore for MemoryStore {
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<()> {
        let now = Instant::now();
        let mut keyspace = self.write();
        keyspace.check(pipeline.commands(), now)?;
        for command in pipeline.into_commands() {
            keyspace.apply(command, now);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        match self.read().live(key, now) {
            None => Ok(None),
            Some(Value::Text(value)) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let now = Instant::now();
        let keyspace = self.read();
        Ok(keys
            .iter()
            .map(|key| match keyspace.live(key, now) {
                Some(Value::Text(value)) => Some(value.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        match self.read().live(key, now) {
            None => Ok(Vec::new()),
            Some(Value::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_union(&self, keys: &[String]) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let keyspace = self.read();
        let mut union: HashSet<&str> = HashSet::new();
        for key in keys {
            match keyspace.live(key, now) {
                None => {}
                Some(Value::Set(members)) => union.extend(members.iter().map(String::as_str)),
                Some(_) => return Err(StoreError::WrongType(key.clone())),
            }
        }
        Ok(union.into_iter().map(str::to_string).collect())
    }

    async fn set_card(&self, key: &str) -> StoreResult<usize> {
        let now = Instant::now();
        match self.read().live(key, now) {
            None => Ok(0),
            Some(Value::Set(members)) => Ok(members.len()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn geo_radius(&self, key: &str, center: GeoPoint, radius_km: f64) -> StoreResult<Vec<GeoMember>> {
        let now = Instant::now();
        let keyspace = self.read();
        let points = match keyspace.live(key, now) {
            None => return Ok(Vec::new()),
            Some(Value::Geo(points)) => points,
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        let mut hits: Vec<GeoMember> = points
            .iter()
            .filter_map(|(member, point)| {
                let distance_km = haversine_km(center, *point);
                (distance_km <= radius_km).then(|| GeoMember {
                    member: member.clone(),
                    point: *point,
                    distance_km,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(hits)
    }

    async fn publish(&self, channel: &str, payload: String) -> StoreResult<usize> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = channels.get(channel) else {
            return Ok(0);
        };
        match sender.send(payload) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                // Every subscriber is gone.
                channels.remove(channel);
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<broadcast::Receiver<String>> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0);
        Ok(sender.subscribe())
    }
}
