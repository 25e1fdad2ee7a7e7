use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use locator_core::error::{StoreError, StoreResult};
use locator_core::spatial::GeoPoint;
use locator_core::store::{GeoMember, LocationStore, MemoryStore, Pipeline};
use tokio::sync::broadcast;

/// [`MemoryStore`] wrapper that can be told to fail or stall.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_publish: AtomicBool,
    delay_ms: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Every call sleeps this long before answering.
    pub fn delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn gate(&self, flag: &AtomicBool) -> StoreResult<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

impl LocationStore for FlakyStore {
    async fn execute(&self, pipeline: Pipeline) -> StoreResult<()> {
        self.gate(&self.fail_writes).await?;
        self.inner.execute(pipeline).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.gate(&self.fail_reads).await?;
        self.inner.get(key).await
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.gate(&self.fail_reads).await?;
        self.inner.get_many(keys).await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.gate(&self.fail_reads).await?;
        self.inner.set_members(key).await
    }

    async fn set_union(&self, keys: &[String]) -> StoreResult<Vec<String>> {
        self.gate(&self.fail_reads).await?;
        self.inner.set_union(keys).await
    }

    async fn set_card(&self, key: &str) -> StoreResult<usize> {
        self.gate(&self.fail_reads).await?;
        self.inner.set_card(key).await
    }

    async fn geo_radius(&self, key: &str, center: GeoPoint, radius_km: f64) -> StoreResult<Vec<GeoMember>> {
        self.gate(&self.fail_reads).await?;
        self.inner.geo_radius(key, center, radius_km).await
    }

    async fn publish(&self, channel: &str, payload: String) -> StoreResult<usize> {
        self.gate(&self.fail_publish).await?;
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<broadcast::Receiver<String>> {
        self.inner.subscribe(channel).await
    }
}
