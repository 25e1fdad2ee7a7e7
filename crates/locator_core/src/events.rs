//! Durable event-log forwarding.
//!
//! Ingestion hands each accepted record to an [`EventForwarder`], which queues it on a
//! bounded channel and returns immediately. A background task drains the queue into an
//! [`EventLog`]. Failures on that path are logged and counted, never returned.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::error::EventLogError;
use crate::model::AgentLocation;
use crate::telemetry::LocatorTelemetry;

/// Append-only log partitioned by key (the agent id).
pub trait EventLog: Send + Sync + 'static {
    fn append(&self, partition_key: &str, payload: Vec<u8>) -> impl Future<Output = Result<(), EventLogError>> + Send;
}

// ---------------------------------------------------------------------------
// JSON-lines log on local disk
// ---------------------------------------------------------------------------

/// One newline-delimited JSON file per partition: `<dir>/<topic>-<partition>.jsonl`.
pub struct JsonLinesEventLog {
    dir: PathBuf,
    topic: String,
    partitions: u32,
    files: tokio::sync::Mutex<HashMap<u32, File>>,
}

impl JsonLinesEventLog {
    /// Create the directory if needed. Files are opened lazily on first append.
    pub async fn open(dir: impl AsRef<Path>, topic: impl Into<String>, partitions: u32) -> Result<Self, EventLogError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            topic: topic.into(),
            partitions: partitions.max(1),
            files: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Stable partition for a key: first eight bytes of its SHA-256 digest.
    pub fn partition_for(&self, key: &str) -> u32 {
        let digest = Sha256::digest(key.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(head) % u64::from(self.partitions)) as u32
    }

    pub fn partition_path(&self, partition: u32) -> PathBuf {
        self.dir.join(format!("{}-{partition}.jsonl", self.topic))
    }
}

impl EventLog for JsonLinesEventLog {
    async fn append(&self, partition_key: &str, mut payload: Vec<u8>) -> Result<(), EventLogError> {
        let partition = self.partition_for(partition_key);
        let mut files = self.files.lock().await;
        let file = match files.entry(partition) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.partition_path(partition))
                    .await?;
                entry.insert(file)
            }
        };
        payload.push(b'\n');
        file.write_all(&payload).await?;
        file.flush().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory log
// ---------------------------------------------------------------------------

/// Keeps every appended entry in memory. Can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    entries: Mutex<Vec<(String, Vec<u8>)>>,
    failing: std::sync::atomic::AtomicBool,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail with an io error.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded records in append order, paired with their partition key.
    pub fn records(&self) -> Vec<(String, AgentLocation)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(key, payload)| {
                serde_json::from_slice(payload)
                    .ok()
                    .map(|record| (key.clone(), record))
            })
            .collect()
    }
}

impl EventLog for MemoryEventLog {
    async fn append(&self, partition_key: &str, payload: Vec<u8>) -> Result<(), EventLogError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EventLogError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "event log unreachable",
            )));
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((partition_key.to_string(), payload));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Forwarder
// ---------------------------------------------------------------------------

/// Non-blocking handoff from ingestion to the event-log writer task.
#[derive(Clone)]
pub struct EventForwarder {
    tx: mpsc::Sender<AgentLocation>,
    telemetry: Arc<LocatorTelemetry>,
}

impl EventForwarder {
    /// Spawn the writer task. It exits once every forwarder clone has been dropped and
    /// the queue is drained.
    pub fn spawn<L: EventLog>(
        log: Arc<L>,
        capacity: usize,
        telemetry: Arc<LocatorTelemetry>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AgentLocation>(capacity.max(1));
        let writer_telemetry = Arc::clone(&telemetry);
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let payload = match serde_json::to_vec(&record) {
                    Ok(payload) => payload,
                    Err(err) => {
                        writer_telemetry.record_forward_failure();
                        tracing::warn!(agent_id = %record.agent_id, error = %err, "event encode failed");
                        continue;
                    }
                };
                match log.append(&record.agent_id, payload).await {
                    Ok(()) => writer_telemetry.record_forward_written(),
                    Err(err) => {
                        writer_telemetry.record_forward_failure();
                        tracing::warn!(agent_id = %record.agent_id, error = %err, "event log append failed");
                    }
                }
            }
            tracing::debug!("event forwarder drained");
        });
        (Self { tx, telemetry }, handle)
    }

    /// Queue a copy of `record`. Never blocks; a full or closed queue drops the event.
    pub fn forward(&self, record: &AgentLocation) {
        match self.tx.try_send(record.clone()) {
            Ok(()) => self.telemetry.record_forward_queued(),
            Err(TrySendError::Full(dropped)) => {
                self.telemetry.record_forward_dropped();
                tracing::warn!(agent_id = %dropped.agent_id, "event forward queue full, dropping event");
            }
            Err(TrySendError::Closed(dropped)) => {
                self.telemetry.record_forward_failure();
                tracing::warn!(agent_id = %dropped.agent_id, error = %EventLogError::Closed, "event forward failed");
            }
        }
    }
}
