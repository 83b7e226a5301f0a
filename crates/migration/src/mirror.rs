//! Dual-write mirroring.
//!
//! [`DualWriter`] is the application's write path during a migration. Every
//! legacy write is mirrored to the new store on a bounded background task,
//! and its key is marked dirty when the backfill cursor has already passed
//! it. [`MirrorControl`] holds the shared switches the orchestrator flips:
//! the write mode, per-collection backfill cursors, a write gate for brief
//! freezes, and the mirror task permits.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cutover_core::types::{Collection, RecordId, RecordKey};
use cutover_db::{Record, RecordStore, StoreError};
use tokio::sync::{RwLock, RwLockWriteGuard, Semaphore};

use crate::backfill::SkippedRecords;
use crate::dirty_set::DirtySetTracker;
use crate::transform::{RecordTransform, TransformError};

/// Upper bound on a single background mirror write.
const MIRROR_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Write mode
// ---------------------------------------------------------------------------

/// Where application writes go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Legacy store only.
    Off,
    /// Legacy store, mirrored to the new store.
    DualWrite,
    /// New store only (after cutover).
    NewOnly,
}

impl WriteMode {
    /// Whether reads are served by the new store.
    pub fn reads_from_target(self) -> bool {
        self == Self::NewOnly
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::DualWrite => 1,
            Self::NewOnly => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::DualWrite,
            2 => Self::NewOnly,
            _ => Self::Off,
        }
    }
}

// ---------------------------------------------------------------------------
// Backfill cursors
// ---------------------------------------------------------------------------

/// Shared view of one collection's backfill position.
///
/// A key has been "passed" once its batch is in flight or finished. While a
/// batch is being copied every write to the collection counts as passed,
/// since the batch's upper bound is not known until it has been read.
#[derive(Debug, Default)]
struct PhaseCursor {
    /// Ids strictly below this have been copied. `u64::MAX` once done.
    watermark: AtomicU64,
    in_flight: AtomicBool,
}

impl PhaseCursor {
    fn has_passed(&self, id: RecordId) -> bool {
        if self.in_flight.load(Ordering::SeqCst) {
            return true;
        }
        let watermark = self.watermark.load(Ordering::SeqCst);
        watermark == u64::MAX || id < watermark
    }

    fn reset(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
        self.watermark.store(0, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// MirrorControl
// ---------------------------------------------------------------------------

pub struct MirrorControl {
    mode: AtomicU8,
    cursors: [PhaseCursor; 2],
    gate: RwLock<()>,
    permits: Arc<Semaphore>,
    max_permits: u32,
}

impl MirrorControl {
    pub fn new(max_concurrent: usize) -> Self {
        let max_permits = u32::try_from(max_concurrent.max(1)).unwrap_or(u32::MAX);
        Self {
            mode: AtomicU8::new(WriteMode::Off.to_u8()),
            cursors: Default::default(),
            gate: RwLock::new(()),
            permits: Arc::new(Semaphore::new(max_permits as usize)),
            max_permits,
        }
    }

    fn cursor(&self, collection: Collection) -> &PhaseCursor {
        &self.cursors[(collection.phase_number() - 1) as usize]
    }

    pub fn mode(&self) -> WriteMode {
        WriteMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Switch the write mode. Callers hold [`freeze`](Self::freeze) so no
    /// application write observes a half-applied switch.
    pub fn set_mode(&self, mode: WriteMode) {
        self.mode.store(mode.to_u8(), Ordering::SeqCst);
    }

    pub fn has_passed(&self, key: RecordKey) -> bool {
        self.cursor(key.collection).has_passed(key.id)
    }

    /// Mark a batch of `collection` as in flight.
    pub fn begin_batch(&self, collection: Collection) {
        self.cursor(collection).in_flight.store(true, Ordering::SeqCst);
    }

    /// Publish the cursor after a batch. `last` is the highest id copied so
    /// far; `done` marks the whole collection as passed.
    pub fn end_batch(&self, collection: Collection, last: Option<RecordId>, done: bool) {
        let cursor = self.cursor(collection);
        let watermark = if done {
            u64::MAX
        } else {
            last.map_or(0, |id| id.saturating_add(1))
        };
        cursor.watermark.store(watermark, Ordering::SeqCst);
        cursor.in_flight.store(false, Ordering::SeqCst);
    }

    pub fn reset_cursors(&self) {
        for cursor in &self.cursors {
            cursor.reset();
        }
    }

    /// Hold application writes until the guard is dropped.
    pub async fn freeze(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    /// Wait for every in-flight mirror write to finish.
    pub async fn quiesce(&self) {
        // The semaphore is never closed, so acquisition cannot fail.
        let _all = self.permits.acquire_many(self.max_permits).await;
    }
}

// ---------------------------------------------------------------------------
// DualWriter
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Application read/write path that follows the migration's routing.
#[derive(Clone)]
pub struct DualWriter {
    legacy: Arc<dyn RecordStore>,
    target: Arc<dyn RecordStore>,
    transform: Arc<dyn RecordTransform>,
    control: Arc<MirrorControl>,
    tracker: Arc<DirtySetTracker>,
    skipped: Arc<SkippedRecords>,
}

impl DualWriter {
    pub fn new(
        legacy: Arc<dyn RecordStore>,
        target: Arc<dyn RecordStore>,
        transform: Arc<dyn RecordTransform>,
        control: Arc<MirrorControl>,
        tracker: Arc<DirtySetTracker>,
        skipped: Arc<SkippedRecords>,
    ) -> Self {
        Self {
            legacy,
            target,
            transform,
            control,
            tracker,
            skipped,
        }
    }

    pub fn mode(&self) -> WriteMode {
        self.control.mode()
    }

    /// Write a record through the current routing.
    ///
    /// In dual-write mode the legacy write is authoritative and must succeed;
    /// the mirror write never fails the caller.
    pub async fn write(&self, collection: Collection, record: Record) -> Result<(), WriteError> {
        let _gate = self.control.gate.read().await;

        match self.control.mode() {
            WriteMode::Off => self.legacy.write(collection, &record).await?,
            WriteMode::DualWrite => {
                self.legacy.write(collection, &record).await?;
                let key = RecordKey::new(collection, record.id);
                if self.control.has_passed(key) {
                    self.tracker.mark(key);
                }
                self.spawn_mirror(key, record);
            }
            WriteMode::NewOnly => {
                let migrated = self.transform.migrate(collection, &record)?;
                self.target.write(collection, &migrated).await?;
            }
        }
        Ok(())
    }

    /// Read a record from whichever store is authoritative.
    pub async fn read(
        &self,
        collection: Collection,
        id: RecordId,
    ) -> Result<Option<Record>, StoreError> {
        if self.control.mode().reads_from_target() {
            self.target.get(collection, id).await
        } else {
            self.legacy.get(collection, id).await
        }
    }

    fn spawn_mirror(&self, key: RecordKey, record: Record) {
        let permit = match Arc::clone(&self.control.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                // Saturated: leave the copy to the dirty-set drain.
                self.tracker.mark(key);
                tracing::debug!(
                    collection = %key.collection,
                    id = key.id,
                    "Mirror saturated, marked dirty"
                );
                return;
            }
        };

        let this = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match this.mirror(key, &record).await {
                Ok(()) => {
                    this.skipped.remove(&key);
                    // A copy that lands after the cursor passed the key may
                    // have overwritten a newer backfilled value.
                    if this.control.has_passed(key) {
                        this.tracker.mark(key);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        collection = %key.collection,
                        id = key.id,
                        error = %e,
                        "Mirror write failed, marked dirty"
                    );
                    this.tracker.mark(key);
                }
            }
        });
    }

    async fn mirror(&self, key: RecordKey, record: &Record) -> Result<(), WriteError> {
        let migrated = self.transform.migrate(key.collection, record)?;
        match tokio::time::timeout(
            MIRROR_WRITE_TIMEOUT,
            self.target.write(key.collection, &migrated),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(WriteError::Store(StoreError::Unavailable(format!(
                "mirror write timed out after {}s",
                MIRROR_WRITE_TIMEOUT.as_secs()
            )))),
        }
    }
}
