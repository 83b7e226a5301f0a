#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use cutover_core::migration::MigrationState;
use cutover_core::types::{Collection, RecordId, RecordKey};
use cutover_db::store::StoreInfo;
use cutover_db::{MemoryStore, Record, RecordStore, StoreResult};
use cutover_events::EventBus;
use cutover_migration::prerequisites::HostResources;
use cutover_migration::{
    DirtySetTracker, IdentityTransform, MigrationConfig, MigrationDeps, MigrationHandle,
    Orchestrator,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Host resources with fixed, ample resources.
pub struct PlentyResources;

#[async_trait]
impl HostResources for PlentyResources {
    async fn free_disk_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(u64::MAX / 2)
    }

    async fn available_memory_bytes(&self) -> io::Result<u64> {
        Ok(8 * 1024 * 1024 * 1024)
    }
}

/// Seed ids `1..=count` into `collection`.
pub async fn seed(store: &MemoryStore, collection: Collection, count: u64) {
    store
        .seed(
            collection,
            (1..=count).map(|id| {
                Record::new(id, json!({ "label": format!("r{id}"), "version": 0 }))
            }),
        )
        .await;
}

pub fn test_config() -> MigrationConfig {
    MigrationConfig {
        batch_size: 100,
        data_dir: std::env::temp_dir(),
        ..MigrationConfig::default()
    }
}

pub struct Harness {
    pub handle: MigrationHandle,
    pub events: Arc<EventBus>,
    pub cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn a migration worker over the given stores.
pub fn spawn(
    legacy: Arc<dyn RecordStore>,
    target: Arc<dyn RecordStore>,
    config: MigrationConfig,
) -> Harness {
    let events = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();
    let (handle, _join) = Orchestrator::spawn(
        MigrationDeps {
            legacy,
            target,
            transform: Arc::new(IdentityTransform),
            host: Arc::new(PlentyResources),
            events: Arc::clone(&events),
        },
        config,
        cancel.clone(),
    );
    Harness {
        handle,
        events,
        cancel,
    }
}

/// Wait until the migration reaches `state` or any terminal state, and
/// return the state reached. Panics after thirty seconds.
pub async fn wait_until(handle: &MigrationHandle, state: MigrationState) -> MigrationState {
    let mut rx = handle.subscribe_status();
    let reached = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let current = rx.borrow_and_update().state;
            if current == state || current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return current;
            }
        }
    })
    .await;
    reached.unwrap_or_else(|_| {
        panic!(
            "timed out waiting for {state}, at {}",
            handle.status().state
        )
    })
}

// ---------------------------------------------------------------------------
// Store wrapper with fault hooks
// ---------------------------------------------------------------------------

/// Delegates to a [`MemoryStore`], optionally altering what reads return.
pub struct HookedStore {
    pub inner: MemoryStore,
    /// Return every fetched record with a modified payload.
    pub tamper_gets: AtomicBool,
    /// Mark a fresh dirty key on every fetch, so the dirty set never drains.
    pub churn: OnceLock<Arc<DirtySetTracker>>,
    churn_ids: AtomicU64,
    churn_range: u64,
}

impl HookedStore {
    pub fn new(inner: MemoryStore, churn_range: u64) -> Self {
        Self {
            inner,
            tamper_gets: AtomicBool::new(false),
            churn: OnceLock::new(),
            churn_ids: AtomicU64::new(0),
            churn_range: churn_range.max(1),
        }
    }

    fn churn_once(&self) {
        if let Some(tracker) = self.churn.get() {
            let n = self.churn_ids.fetch_add(1, Ordering::SeqCst);
            tracker.mark(RecordKey::new(Collection::Detections, n % self.churn_range + 1));
        }
    }
}

#[async_trait]
impl RecordStore for HookedStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn location(&self) -> String {
        self.inner.location()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn count(&self, collection: Collection) -> StoreResult<u64> {
        self.inner.count(collection).await
    }

    async fn read_batch(
        &self,
        collection: Collection,
        after: Option<RecordId>,
        limit: usize,
    ) -> StoreResult<Vec<Record>> {
        if collection == Collection::Predictions {
            self.churn_once();
        }
        self.inner.read_batch(collection, after, limit).await
    }

    async fn get(&self, collection: Collection, id: RecordId) -> StoreResult<Option<Record>> {
        self.churn_once();
        let record = self.inner.get(collection, id).await?;
        if self.tamper_gets.load(Ordering::SeqCst) {
            return Ok(record.map(|mut r| {
                r.payload["label"] = json!("tampered");
                r
            }));
        }
        Ok(record)
    }

    async fn write(&self, collection: Collection, record: &Record) -> StoreResult<()> {
        self.inner.write(collection, record).await
    }

    async fn write_batch(&self, collection: Collection, records: &[Record]) -> StoreResult<()> {
        self.inner.write_batch(collection, records).await
    }

    async fn truncate(&self, collection: Collection) -> StoreResult<u64> {
        self.inner.truncate(collection).await
    }

    async fn integrity_check(&self) -> StoreResult<()> {
        self.inner.integrity_check().await
    }

    async fn info(&self) -> StoreResult<StoreInfo> {
        self.inner.info().await
    }

    async fn delete(&self) -> StoreResult<u64> {
        self.inner.delete().await
    }

    async fn check_write_access(&self) -> StoreResult<()> {
        self.inner.check_write_access().await
    }
}
