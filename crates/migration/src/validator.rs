//! Post-backfill validation.
//!
//! Compares per-collection record counts (legacy minus skipped must equal the
//! new store) and checksums a stride sample of records field by field.

use std::sync::Arc;

use cutover_core::types::{Collection, RecordId, RecordKey};
use cutover_db::record::diff_fields;
use cutover_db::{Record, RecordStore, StoreError};
use serde::Serialize;

use crate::backfill::SkippedRecords;
use crate::transform::RecordTransform;

/// Legacy records read per page while walking the sample.
const SAMPLE_SCAN_BATCH: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ValidationFailure {
    #[error("{collection}: record count mismatch (expected {expected}, found {actual})")]
    CountMismatch {
        collection: Collection,
        expected: u64,
        actual: u64,
    },

    #[error("{collection}: record {id} is missing from the new store")]
    MissingRecord { collection: Collection, id: RecordId },

    #[error("{collection}: checksum mismatch for record {id} in fields [{}]", fields.join(", "))]
    ChecksumMismatch {
        collection: Collection,
        id: RecordId,
        fields: Vec<String>,
    },

    #[error("validation could not read the {store} store: {source}")]
    Store {
        store: String,
        #[source]
        source: StoreError,
    },
}

impl ValidationFailure {
    /// A store error says nothing about data consistency.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub collection: Collection,
    pub legacy_count: u64,
    pub target_count: u64,
    pub skipped: u64,
    pub sampled: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub collections: Vec<CollectionReport>,
}

impl ValidationReport {
    pub fn total_sampled(&self) -> u64 {
        self.collections.iter().map(|c| c.sampled).sum()
    }
}

pub struct Validator {
    legacy: Arc<dyn RecordStore>,
    target: Arc<dyn RecordStore>,
    transform: Arc<dyn RecordTransform>,
    skipped: Arc<SkippedRecords>,
    sample_size: usize,
}

impl Validator {
    pub fn new(
        legacy: Arc<dyn RecordStore>,
        target: Arc<dyn RecordStore>,
        transform: Arc<dyn RecordTransform>,
        skipped: Arc<SkippedRecords>,
        sample_size: usize,
    ) -> Self {
        Self {
            legacy,
            target,
            transform,
            skipped,
            sample_size,
        }
    }

    /// Validate every collection, stopping at the first failure.
    pub async fn validate(&self) -> Result<ValidationReport, ValidationFailure> {
        let mut report = ValidationReport::default();

        for collection in Collection::ALL {
            let legacy_count = self
                .legacy
                .count(collection)
                .await
                .map_err(|e| store_failure(&*self.legacy, e))?;
            let target_count = self
                .target
                .count(collection)
                .await
                .map_err(|e| store_failure(&*self.target, e))?;
            let skipped = self.skipped.count_for(collection);

            let expected = legacy_count.saturating_sub(skipped);
            if expected != target_count {
                return Err(ValidationFailure::CountMismatch {
                    collection,
                    expected,
                    actual: target_count,
                });
            }

            let sampled = self.sample(collection, legacy_count).await?;
            report.collections.push(CollectionReport {
                collection,
                legacy_count,
                target_count,
                skipped,
                sampled,
            });
        }

        tracing::info!(sampled = report.total_sampled(), "Validation passed");
        Ok(report)
    }

    /// Checksum every `count / sample_size`-th legacy record.
    async fn sample(&self, collection: Collection, count: u64) -> Result<u64, ValidationFailure> {
        if self.sample_size == 0 || count == 0 {
            return Ok(0);
        }
        let limit = self.sample_size as u64;
        let stride = (count / limit).max(1);

        let mut cursor = None;
        let mut index = 0u64;
        let mut sampled = 0u64;

        'scan: loop {
            let page = self
                .legacy
                .read_batch(collection, cursor, SAMPLE_SCAN_BATCH)
                .await
                .map_err(|e| store_failure(&*self.legacy, e))?;

            for record in &page {
                if index % stride == 0 {
                    if self.compare(collection, record).await? {
                        sampled += 1;
                    }
                    if sampled >= limit {
                        break 'scan;
                    }
                }
                index += 1;
            }

            match page.last() {
                Some(last) if page.len() == SAMPLE_SCAN_BATCH => cursor = Some(last.id),
                _ => break,
            }
        }
        Ok(sampled)
    }

    /// Compare one legacy record with its new-store copy. Returns `false`
    /// when the record was not compared (skipped by the transform).
    async fn compare(
        &self,
        collection: Collection,
        record: &Record,
    ) -> Result<bool, ValidationFailure> {
        if self.skipped.contains(&RecordKey::new(collection, record.id)) {
            return Ok(false);
        }
        let Ok(expected) = self.transform.migrate(collection, record) else {
            return Ok(false);
        };

        let actual = self
            .target
            .get(collection, record.id)
            .await
            .map_err(|e| store_failure(&*self.target, e))?
            .ok_or(ValidationFailure::MissingRecord {
                collection,
                id: record.id,
            })?;

        let fields = diff_fields(&expected, &actual);
        if !fields.is_empty() {
            return Err(ValidationFailure::ChecksumMismatch {
                collection,
                id: record.id,
                fields,
            });
        }
        Ok(true)
    }
}

fn store_failure(store: &dyn RecordStore, source: StoreError) -> ValidationFailure {
    ValidationFailure::Store {
        store: store.name().to_string(),
        source,
    }
}
