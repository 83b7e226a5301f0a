//! The storage engine port consumed by the migration runtime.

use async_trait::async_trait;
use cutover_core::types::{Collection, RecordId, Timestamp};
use serde::Serialize;

use crate::record::Record;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store '{0}' has been deleted")]
    Deleted(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Location, size and freshness of a store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreInfo {
    pub location: String,
    pub exists: bool,
    pub size_bytes: u64,
    pub last_modified: Option<Timestamp>,
}

/// Health of one collection's backing table.
#[derive(Debug, Clone, Serialize)]
pub struct TableHealth {
    pub collection: Collection,
    pub exists: bool,
    pub healthy: bool,
    pub message: Option<String>,
}

/// Engine limits that can make a long migration fail midway.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSettings {
    /// `None` means unlimited.
    pub statement_timeout_secs: Option<u64>,
    /// `None` means the engine has no practical limit.
    pub max_packet_bytes: Option<u64>,
}

/// A record store holding every [`Collection`].
///
/// Record ids are ordered; [`read_batch`](RecordStore::read_batch) walks them
/// in ascending order strictly after the given cursor.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short name used in logs (`legacy`, `v2`).
    fn name(&self) -> &str;

    /// Stable identity of the underlying storage, used to refuse deleting
    /// the store that is currently serving traffic.
    fn location(&self) -> String;

    async fn ping(&self) -> StoreResult<()>;

    async fn count(&self, collection: Collection) -> StoreResult<u64>;

    async fn read_batch(
        &self,
        collection: Collection,
        after: Option<RecordId>,
        limit: usize,
    ) -> StoreResult<Vec<Record>>;

    async fn get(&self, collection: Collection, id: RecordId) -> StoreResult<Option<Record>>;

    /// Insert or replace a record.
    async fn write(&self, collection: Collection, record: &Record) -> StoreResult<()>;

    async fn write_batch(&self, collection: Collection, records: &[Record]) -> StoreResult<()> {
        for record in records {
            self.write(collection, record).await?;
        }
        Ok(())
    }

    /// Remove every record in `collection`, returning how many were removed.
    async fn truncate(&self, collection: Collection) -> StoreResult<u64>;

    async fn integrity_check(&self) -> StoreResult<()>;

    async fn info(&self) -> StoreResult<StoreInfo>;

    /// Permanently delete the store, returning the bytes freed.
    async fn delete(&self) -> StoreResult<u64>;

    async fn table_health(&self) -> StoreResult<Vec<TableHealth>> {
        let mut tables = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let health = match self.count(collection).await {
                Ok(_) => TableHealth {
                    collection,
                    exists: true,
                    healthy: true,
                    message: None,
                },
                Err(e) => TableHealth {
                    collection,
                    exists: false,
                    healthy: false,
                    message: Some(e.to_string()),
                },
            };
            tables.push(health);
        }
        Ok(tables)
    }

    /// Confirm the current credentials may read every collection.
    async fn check_permissions(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Confirm the store accepts writes without leaving data behind.
    async fn check_write_access(&self) -> StoreResult<()>;

    async fn engine_settings(&self) -> StoreResult<EngineSettings> {
        Ok(EngineSettings::default())
    }
}
