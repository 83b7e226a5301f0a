//! In-process [`RecordStore`] backed by ordered maps.
//!
//! Supports fault injection (unreachable, corrupt, read-only) so the
//! migration runtime can be exercised without an external database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cutover_core::types::{Collection, RecordId, Timestamp};
use tokio::sync::RwLock;

use crate::record::Record;
use crate::store::{RecordStore, StoreError, StoreInfo, StoreResult};

type Tables = HashMap<Collection, BTreeMap<RecordId, Record>>;

/// Cheaply cloneable handle; clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    location: String,
    tables: RwLock<Tables>,
    last_modified: RwLock<Option<Timestamp>>,
    deleted: AtomicBool,
    unreachable: AtomicBool,
    corrupt: AtomicBool,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self::with_location(name, &format!("memory://{name}"))
    }

    pub fn with_location(name: &str, location: &str) -> Self {
        let tables = Collection::ALL
            .into_iter()
            .map(|c| (c, BTreeMap::new()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                location: location.to_string(),
                tables: RwLock::new(tables),
                last_modified: RwLock::new(None),
                deleted: AtomicBool::new(false),
                unreachable: AtomicBool::new(false),
                corrupt: AtomicBool::new(false),
                read_only: AtomicBool::new(false),
            }),
        }
    }

    /// Bulk-load records, bypassing fault injection.
    pub async fn seed(&self, collection: Collection, records: impl IntoIterator<Item = Record>) {
        let mut tables = self.inner.tables.write().await;
        let table = tables.entry(collection).or_default();
        for record in records {
            table.insert(record.id, record);
        }
        *self.inner.last_modified.write().await = Some(chrono::Utc::now());
    }

    /// All records of `collection` in id order.
    pub async fn snapshot(&self, collection: Collection) -> Vec<Record> {
        self.inner
            .tables
            .read()
            .await
            .get(&collection)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_unreachable(&self, value: bool) {
        self.inner.unreachable.store(value, Ordering::SeqCst);
    }

    pub fn set_corrupt(&self, value: bool) {
        self.inner.corrupt.store(value, Ordering::SeqCst);
    }

    pub fn set_read_only(&self, value: bool) {
        self.inner.read_only.store(value, Ordering::SeqCst);
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.inner.deleted.load(Ordering::SeqCst) {
            return Err(StoreError::Deleted(self.inner.name.clone()));
        }
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "{} is not reachable",
                self.inner.name
            )));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        self.ensure_available()?;
        if self.inner.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::PermissionDenied(format!(
                "{} is read-only",
                self.inner.name
            )));
        }
        Ok(())
    }

    async fn touch(&self) {
        *self.inner.last_modified.write().await = Some(chrono::Utc::now());
    }

    async fn size_bytes(&self) -> u64 {
        self.inner
            .tables
            .read()
            .await
            .values()
            .flat_map(|t| t.values())
            .map(Record::size_hint)
            .sum()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn location(&self) -> String {
        self.inner.location.clone()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.ensure_available()
    }

    async fn count(&self, collection: Collection) -> StoreResult<u64> {
        self.ensure_available()?;
        let tables = self.inner.tables.read().await;
        Ok(tables.get(&collection).map_or(0, |t| t.len() as u64))
    }

    async fn read_batch(
        &self,
        collection: Collection,
        after: Option<RecordId>,
        limit: usize,
    ) -> StoreResult<Vec<Record>> {
        self.ensure_available()?;
        let tables = self.inner.tables.read().await;
        let Some(table) = tables.get(&collection) else {
            return Ok(Vec::new());
        };
        let batch = match after {
            Some(cursor) => table
                .range((std::ops::Bound::Excluded(cursor), std::ops::Bound::Unbounded))
                .take(limit)
                .map(|(_, r)| r.clone())
                .collect(),
            None => table.values().take(limit).cloned().collect(),
        };
        Ok(batch)
    }

    async fn get(&self, collection: Collection, id: RecordId) -> StoreResult<Option<Record>> {
        self.ensure_available()?;
        let tables = self.inner.tables.read().await;
        Ok(tables.get(&collection).and_then(|t| t.get(&id)).cloned())
    }

    async fn write(&self, collection: Collection, record: &Record) -> StoreResult<()> {
        self.ensure_writable()?;
        self.inner
            .tables
            .write()
            .await
            .entry(collection)
            .or_default()
            .insert(record.id, record.clone());
        self.touch().await;
        Ok(())
    }

    async fn write_batch(&self, collection: Collection, records: &[Record]) -> StoreResult<()> {
        self.ensure_writable()?;
        {
            let mut tables = self.inner.tables.write().await;
            let table = tables.entry(collection).or_default();
            for record in records {
                table.insert(record.id, record.clone());
            }
        }
        self.touch().await;
        Ok(())
    }

    async fn truncate(&self, collection: Collection) -> StoreResult<u64> {
        self.ensure_writable()?;
        let removed = {
            let mut tables = self.inner.tables.write().await;
            let table = tables.entry(collection).or_default();
            let n = table.len() as u64;
            table.clear();
            n
        };
        self.touch().await;
        Ok(removed)
    }

    async fn integrity_check(&self) -> StoreResult<()> {
        self.ensure_available()?;
        if self.inner.corrupt.load(Ordering::SeqCst) {
            return Err(StoreError::Integrity(format!(
                "{} reported corrupted pages",
                self.inner.name
            )));
        }
        Ok(())
    }

    async fn info(&self) -> StoreResult<StoreInfo> {
        if self.is_deleted() {
            return Ok(StoreInfo {
                location: self.location(),
                exists: false,
                size_bytes: 0,
                last_modified: None,
            });
        }
        self.ensure_available()?;
        Ok(StoreInfo {
            location: self.location(),
            exists: true,
            size_bytes: self.size_bytes().await,
            last_modified: *self.inner.last_modified.read().await,
        })
    }

    async fn delete(&self) -> StoreResult<u64> {
        self.ensure_writable()?;
        let freed = self.size_bytes().await;
        self.inner.tables.write().await.clear();
        self.inner.deleted.store(true, Ordering::SeqCst);
        tracing::info!(store = %self.inner.name, freed, "Memory store deleted");
        Ok(freed)
    }

    async fn check_write_access(&self) -> StoreResult<()> {
        self.ensure_writable()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn records(ids: std::ops::Range<u64>) -> Vec<Record> {
        ids.map(|i| Record::new(i, json!({ "n": i }))).collect()
    }

    #[tokio::test]
    async fn read_batch_walks_ids_after_cursor() {
        let store = MemoryStore::new("legacy");
        store.seed(Collection::Detections, records(1..11)).await;

        let first = store.read_batch(Collection::Detections, None, 4).await.unwrap();
        assert_eq!(first.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        let next = store
            .read_batch(Collection::Detections, Some(4), 4)
            .await
            .unwrap();
        assert_eq!(next.first().map(|r| r.id), Some(5));

        let tail = store
            .read_batch(Collection::Detections, Some(10), 4)
            .await
            .unwrap();
        assert!(tail.is_empty());
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let store = MemoryStore::new("legacy");
        store.seed(Collection::Detections, records(0..3)).await;
        assert_eq!(store.count(Collection::Detections).await.unwrap(), 3);
        assert_eq!(store.count(Collection::Predictions).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unreachable_store_rejects_operations() {
        let store = MemoryStore::new("legacy");
        store.set_unreachable(true);
        assert_matches!(store.ping().await, Err(StoreError::Unavailable(_)));
        assert_matches!(
            store.count(Collection::Detections).await,
            Err(StoreError::Unavailable(_))
        );
    }

    #[tokio::test]
    async fn delete_frees_bytes_and_marks_gone() {
        let store = MemoryStore::new("legacy");
        store.seed(Collection::Predictions, records(0..5)).await;
        let freed = store.delete().await.unwrap();
        assert!(freed > 0);
        assert!(store.is_deleted());
        assert!(!store.info().await.unwrap().exists);
        assert_matches!(
            store.count(Collection::Predictions).await,
            Err(StoreError::Deleted(_))
        );
    }

    #[tokio::test]
    async fn read_only_store_refuses_writes() {
        let store = MemoryStore::new("v2");
        store.set_read_only(true);
        let err = store
            .write(Collection::Detections, &Record::new(1, json!({})))
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::PermissionDenied(_));
        assert!(store.check_write_access().await.is_err());
    }

    #[tokio::test]
    async fn corrupt_store_fails_integrity_check() {
        let store = MemoryStore::new("legacy");
        assert!(store.integrity_check().await.is_ok());
        store.set_corrupt(true);
        assert_matches!(store.integrity_check().await, Err(StoreError::Integrity(_)));
    }
}
