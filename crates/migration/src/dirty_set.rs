//! Dirty-set tracker.
//!
//! Records keys of legacy writes that landed behind the backfill cursor (or
//! whose mirror write failed) so the worker can re-migrate them before
//! cutover. Marking is a short critical section on an in-memory set; it
//! never performs I/O, so application writers are not held up by it.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cutover_core::types::{Collection, RecordKey};

/// Concurrent set of dirty record keys.
///
/// Many writers may [`mark`](Self::mark) concurrently while a single worker
/// [`drain`](Self::drain)s. Draining removes keys, so within one drain call
/// each key is returned at most once; a key marked again afterwards is
/// returned by a later drain.
#[derive(Debug, Default)]
pub struct DirtySetTracker {
    keys: Mutex<BTreeSet<RecordKey>>,
}

impl DirtySetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<RecordKey>> {
        // The set holds plain keys; a panicking holder cannot leave it torn.
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` dirty. Idempotent; returns `true` if it was newly added.
    pub fn mark(&self, key: RecordKey) -> bool {
        self.lock().insert(key)
    }

    /// Remove and return up to `limit` keys in key order.
    pub fn drain(&self, limit: usize) -> Vec<RecordKey> {
        let mut keys = self.lock();
        let mut drained = Vec::with_capacity(limit.min(keys.len()));
        while drained.len() < limit {
            match keys.pop_first() {
                Some(key) => drained.push(key),
                None => break,
            }
        }
        drained
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

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.lock().contains(key)
    }

    /// Drop every key, returning how many were discarded.
    pub fn clear(&self) -> u64 {
        let mut keys = self.lock();
        let n = keys.len() as u64;
        keys.clear();
        n
    }
}
