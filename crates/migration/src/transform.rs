//! Record transform seam.
//!
//! The legacy-to-new mapping is opaque to the migration runtime. It only
//! needs `migrate(record) -> record'` and a way to reject a single record
//! without aborting the batch.

use cutover_core::types::Collection;
use cutover_db::Record;

/// A per-record transform failure. The record is skipped and counted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Cannot transform {collection} record {id}: {reason}")]
pub struct TransformError {
    pub collection: Collection,
    pub id: u64,
    pub reason: String,
}

pub trait RecordTransform: Send + Sync {
    fn migrate(&self, collection: Collection, record: &Record) -> Result<Record, TransformError>;
}

/// Copies records unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl RecordTransform for IdentityTransform {
    fn migrate(&self, _collection: Collection, record: &Record) -> Result<Record, TransformError> {
        Ok(record.clone())
    }
}
