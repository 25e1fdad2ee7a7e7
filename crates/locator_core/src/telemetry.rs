//! Telemetry: lock-free counters for activity and soft failures.
//!
//! Soft failures (publish and event-log forwarding) never reach callers, so these
//! counters are the only place they surface besides the logs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Shared counters. Hold it in an `Arc` and hand clones to every component.
#[derive(Debug, Default)]
pub struct LocatorTelemetry {
    updates_ingested: AtomicU64,
    publishes_delivered: AtomicU64,
    publish_failures: AtomicU64,
    forwards_queued: AtomicU64,
    forwards_written: AtomicU64,
    forwards_dropped: AtomicU64,
    forward_failures: AtomicU64,
    searches: AtomicU64,
    surge_cache_hits: AtomicU64,
    surge_cache_misses: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub updates_ingested: u64,
    pub publishes_delivered: u64,
    pub publish_failures: u64,
    pub forwards_queued: u64,
    pub forwards_written: u64,
    pub forwards_dropped: u64,
    pub forward_failures: u64,
    pub searches: u64,
    pub surge_cache_hits: u64,
    pub surge_cache_misses: u64,
}

impl TelemetrySnapshot {
    /// Soft failures of any kind.
    pub fn soft_failures(&self) -> u64 {
        self.publish_failures + self.forwards_dropped + self.forward_failures
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl LocatorTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_update(&self) {
        bump(&self.updates_ingested);
    }

    /// A publish reached at least one subscriber.
    pub fn record_publish_delivered(&self) {
        bump(&self.publishes_delivered);
    }

    pub fn record_publish_failure(&self) {
        bump(&self.publish_failures);
    }

    pub fn record_forward_queued(&self) {
        bump(&self.forwards_queued);
    }

    pub fn record_forward_written(&self) {
        bump(&self.forwards_written);
    }

    /// The forward queue was full.
    pub fn record_forward_dropped(&self) {
        bump(&self.forwards_dropped);
    }

    pub fn record_forward_failure(&self) {
        bump(&self.forward_failures);
    }

    pub fn record_search(&self) {
        bump(&self.searches);
    }

    pub fn record_surge_cache(&self, hit: bool) {
        if hit {
            bump(&self.surge_cache_hits);
        } else {
            bump(&self.surge_cache_misses);
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        TelemetrySnapshot {
            updates_ingested: load(&self.updates_ingested),
            publishes_delivered: load(&self.publishes_delivered),
            publish_failures: load(&self.publish_failures),
            forwards_queued: load(&self.forwards_queued),
            forwards_written: load(&self.forwards_written),
            forwards_dropped: load(&self.forwards_dropped),
            forward_failures: load(&self.forward_failures),
            searches: load(&self.searches),
            surge_cache_hits: load(&self.surge_cache_hits),
            surge_cache_misses: load(&self.surge_cache_misses),
        }
    }
}
