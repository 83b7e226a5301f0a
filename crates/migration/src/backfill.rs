//! Backfill engine.
//!
//! Copies one collection from the legacy store to the new store in bounded,
//! cursor-ordered batches. Each call to [`BackfillEngine::run_phase`] moves
//! at most one batch so the worker can observe commands between batches.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cutover_core::types::{Collection, RecordId, RecordKey};
use cutover_db::{RecordStore, StoreError};

use crate::mirror::MirrorControl;
use crate::transform::RecordTransform;

// ---------------------------------------------------------------------------
// Skipped records ledger
// ---------------------------------------------------------------------------

/// Keys the transform rejected. Validation excludes them from the count
/// comparison and from sampling.
#[derive(Debug, Default)]
pub struct SkippedRecords {
    keys: Mutex<BTreeSet<RecordKey>>,
}

impl SkippedRecords {
    fn lock(&self) -> MutexGuard<'_, BTreeSet<RecordKey>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, key: RecordKey) -> bool {
        self.lock().insert(key)
    }

    pub fn remove(&self, key: &RecordKey) -> bool {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.lock().contains(key)
    }

    pub fn count(&self) -> u64 {
        self.lock().len() as u64
    }

    pub fn count_for(&self, collection: Collection) -> u64 {
        self.lock()
            .iter()
            .filter(|k| k.collection == collection)
            .count() as u64
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("{store} store failed while copying {collection}: {source}")]
    Store {
        store: String,
        collection: Collection,
        #[source]
        source: StoreError,
    },
}

/// Result of one backfill batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub migrated: u64,
    pub skipped: u64,
    /// Highest id read so far; pass it back as the next cursor.
    pub cursor: Option<RecordId>,
    /// The collection has no records beyond `cursor`.
    pub done: bool,
}

/// Result of re-migrating a set of dirty keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemigrateOutcome {
    pub synced: u64,
    pub skipped: u64,
    /// Keys no longer present in the legacy store.
    pub missing: u64,
}

pub struct BackfillEngine {
    legacy: Arc<dyn RecordStore>,
    target: Arc<dyn RecordStore>,
    transform: Arc<dyn RecordTransform>,
    control: Arc<MirrorControl>,
    skipped: Arc<SkippedRecords>,
    batch_size: usize,
}

impl BackfillEngine {
    pub fn new(
        legacy: Arc<dyn RecordStore>,
        target: Arc<dyn RecordStore>,
        transform: Arc<dyn RecordTransform>,
        control: Arc<MirrorControl>,
        skipped: Arc<SkippedRecords>,
        batch_size: usize,
    ) -> Self {
        Self {
            legacy,
            target,
            transform,
            control,
            skipped,
            batch_size: batch_size.max(1),
        }
    }

    /// Copy the next batch of `collection` after `cursor`.
    ///
    /// Records the transform rejects are skipped and counted; a store
    /// failure aborts the batch and is returned.
    pub async fn run_phase(
        &self,
        collection: Collection,
        cursor: Option<RecordId>,
    ) -> Result<BatchOutcome, BackfillError> {
        self.control.begin_batch(collection);
        let result = self.copy_batch(collection, cursor).await;
        match &result {
            Ok(outcome) => self.control.end_batch(collection, outcome.cursor, outcome.done),
            Err(_) => self.control.end_batch(collection, cursor, false),
        }
        result
    }

    async fn copy_batch(
        &self,
        collection: Collection,
        cursor: Option<RecordId>,
    ) -> Result<BatchOutcome, BackfillError> {
        let batch = self
            .legacy
            .read_batch(collection, cursor, self.batch_size)
            .await
            .map_err(|e| self.store_error(&*self.legacy, collection, e))?;

        let done = batch.len() < self.batch_size;
        let next_cursor = batch.last().map(|r| r.id).or(cursor);

        let mut migrated = Vec::with_capacity(batch.len());
        let mut skipped = 0u64;
        for record in &batch {
            match self.transform.migrate(collection, record) {
                Ok(out) => migrated.push(out),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping record that cannot be transformed");
                    self.skipped.insert(RecordKey::new(collection, record.id));
                    skipped += 1;
                }
            }
        }

        if !migrated.is_empty() {
            self.target
                .write_batch(collection, &migrated)
                .await
                .map_err(|e| self.store_error(&*self.target, collection, e))?;
        }

        tracing::debug!(
            collection = %collection,
            migrated = migrated.len(),
            skipped,
            cursor = ?next_cursor,
            done,
            "Backfill batch copied"
        );

        Ok(BatchOutcome {
            migrated: migrated.len() as u64,
            skipped,
            cursor: next_cursor,
            done,
        })
    }

    /// Re-copy `keys` from their current legacy values.
    pub async fn remigrate(&self, keys: &[RecordKey]) -> Result<RemigrateOutcome, BackfillError> {
        let mut outcome = RemigrateOutcome::default();

        for &key in keys {
            let current = self
                .legacy
                .get(key.collection, key.id)
                .await
                .map_err(|e| self.store_error(&*self.legacy, key.collection, e))?;

            let Some(record) = current else {
                outcome.missing += 1;
                continue;
            };

            match self.transform.migrate(key.collection, &record) {
                Ok(out) => {
                    self.target
                        .write(key.collection, &out)
                        .await
                        .map_err(|e| self.store_error(&*self.target, key.collection, e))?;
                    self.skipped.remove(&key);
                    outcome.synced += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping dirty record that cannot be transformed");
                    self.skipped.insert(key);
                    outcome.skipped += 1;
                }
            }
        }
        Ok(outcome)
    }

    fn store_error(
        &self,
        store: &dyn RecordStore,
        collection: Collection,
        source: StoreError,
    ) -> BackfillError {
        BackfillError::Store {
            store: store.name().to_string(),
            collection,
            source,
        }
    }
}
