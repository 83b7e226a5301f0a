//! PostgreSQL-backed [`RecordStore`].
//!
//! Each collection lives in its own table named `{prefix}_{collection}`
//! with a `BIGINT` primary key and a `JSONB` payload. Legacy and new stores
//! may share one database and differ only by prefix.

use async_trait::async_trait;
use cutover_core::types::{Collection, RecordId, Timestamp};

use crate::record::Record;
use crate::store::{EngineSettings, RecordStore, StoreError, StoreInfo, StoreResult, TableHealth};
use crate::DbPool;

/// Column list for record queries.
const COLUMNS: &str = "id, payload";

#[derive(Clone)]
pub struct PgRecordStore {
    pool: DbPool,
    name: String,
    prefix: String,
}

impl PgRecordStore {
    /// Build a store over `pool`. `prefix` must be a plain SQL identifier
    /// since it is interpolated into table names.
    pub fn new(pool: DbPool, name: &str, prefix: &str) -> StoreResult<Self> {
        validate_prefix(prefix)?;
        Ok(Self {
            pool,
            name: name.to_string(),
            prefix: prefix.to_string(),
        })
    }

    fn table(&self, collection: Collection) -> String {
        format!("{}_{}", self.prefix, collection.as_str())
    }

    /// Create the collection tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for collection in Collection::ALL {
            let query = format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                    id BIGINT PRIMARY KEY, \
                    payload JSONB NOT NULL, \
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\
                 )",
                self.table(collection)
            );
            sqlx::query(&query).execute(&self.pool).await?;
        }
        tracing::debug!(store = %self.name, prefix = %self.prefix, "Store schema ensured");
        Ok(())
    }

    async fn table_exists(&self, collection: Collection) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.table(collection))
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn size_bytes(&self) -> StoreResult<u64> {
        let mut total = 0u64;
        for collection in Collection::ALL {
            let size: Option<i64> =
                sqlx::query_scalar("SELECT pg_total_relation_size(to_regclass($1))")
                    .bind(self.table(collection))
                    .fetch_one(&self.pool)
                    .await?;
            total += size.unwrap_or(0).max(0) as u64;
        }
        Ok(total)
    }

    async fn has_privilege(&self, collection: Collection, privilege: &str) -> StoreResult<bool> {
        let granted: bool =
            sqlx::query_scalar("SELECT has_table_privilege(current_user, $1, $2)")
                .bind(self.table(collection))
                .bind(privilege)
                .fetch_one(&self.pool)
                .await?;
        Ok(granted)
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> String {
        let options = self.pool.connect_options();
        format!(
            "postgres://{}:{}/{}#{}",
            options.get_host(),
            options.get_port(),
            options.get_database().unwrap_or_default(),
            self.prefix
        )
    }

    async fn ping(&self) -> StoreResult<()> {
        crate::health_check(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn count(&self, collection: Collection) -> StoreResult<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", self.table(collection));
        let count: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn read_batch(
        &self,
        collection: Collection,
        after: Option<RecordId>,
        limit: usize,
    ) -> StoreResult<Vec<Record>> {
        let query = format!(
            "SELECT {COLUMNS} FROM {} WHERE ($1::BIGINT IS NULL OR id > $1) ORDER BY id LIMIT $2",
            self.table(collection)
        );
        let after = after.map(to_db_id).transpose()?;
        let rows: Vec<(i64, serde_json::Value)> = sqlx::query_as(&query)
            .bind(after)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    async fn get(&self, collection: Collection, id: RecordId) -> StoreResult<Option<Record>> {
        let query = format!("SELECT {COLUMNS} FROM {} WHERE id = $1", self.table(collection));
        let row: Option<(i64, serde_json::Value)> = sqlx::query_as(&query)
            .bind(to_db_id(id)?)
            .fetch_optional(&self.pool)
            .await?;
        row.map(from_row).transpose()
    }

    async fn write(&self, collection: Collection, record: &Record) -> StoreResult<()> {
        let query = format!(
            "INSERT INTO {} (id, payload) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload, updated_at = now()",
            self.table(collection)
        );
        sqlx::query(&query)
            .bind(to_db_id(record.id)?)
            .bind(&record.payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn write_batch(&self, collection: Collection, records: &[Record]) -> StoreResult<()> {
        let query = format!(
            "INSERT INTO {} (id, payload) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload, updated_at = now()",
            self.table(collection)
        );
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(&query)
                .bind(to_db_id(record.id)?)
                .bind(&record.payload)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn truncate(&self, collection: Collection) -> StoreResult<u64> {
        let query = format!("DELETE FROM {}", self.table(collection));
        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn integrity_check(&self) -> StoreResult<()> {
        for collection in Collection::ALL {
            if !self.table_exists(collection).await? {
                return Err(StoreError::Integrity(format!(
                    "table {} is missing",
                    self.table(collection)
                )));
            }
            let query = format!(
                "SELECT COUNT(*) FROM {} WHERE jsonb_typeof(payload) IS NULL",
                self.table(collection)
            );
            let broken: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
            if broken > 0 {
                return Err(StoreError::Integrity(format!(
                    "{broken} rows in {} have unreadable payloads",
                    self.table(collection)
                )));
            }
        }
        Ok(())
    }

    async fn info(&self) -> StoreResult<StoreInfo> {
        let mut exists = false;
        let mut last_modified: Option<Timestamp> = None;
        for collection in Collection::ALL {
            if !self.table_exists(collection).await? {
                continue;
            }
            exists = true;
            let query = format!("SELECT MAX(updated_at) FROM {}", self.table(collection));
            let modified: Option<Timestamp> =
                sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
            last_modified = last_modified.max(modified);
        }
        Ok(StoreInfo {
            location: self.location(),
            exists,
            size_bytes: if exists { self.size_bytes().await? } else { 0 },
            last_modified,
        })
    }

    async fn delete(&self) -> StoreResult<u64> {
        let freed = self.size_bytes().await?;
        for collection in Collection::ALL {
            let query = format!("DROP TABLE IF EXISTS {}", self.table(collection));
            sqlx::query(&query).execute(&self.pool).await?;
        }
        tracing::info!(store = %self.name, freed, "Store tables dropped");
        Ok(freed)
    }

    async fn table_health(&self) -> StoreResult<Vec<TableHealth>> {
        let mut tables = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let exists = self.table_exists(collection).await?;
            tables.push(TableHealth {
                collection,
                exists,
                healthy: exists,
                message: (!exists).then(|| format!("table {} is missing", self.table(collection))),
            });
        }
        Ok(tables)
    }

    async fn check_permissions(&self) -> StoreResult<()> {
        for collection in Collection::ALL {
            if !self.has_privilege(collection, "SELECT").await? {
                return Err(StoreError::PermissionDenied(format!(
                    "SELECT on {} is not granted",
                    self.table(collection)
                )));
            }
        }
        Ok(())
    }

    async fn check_write_access(&self) -> StoreResult<()> {
        self.ensure_schema().await?;
        for collection in Collection::ALL {
            if !self.has_privilege(collection, "INSERT").await? {
                return Err(StoreError::PermissionDenied(format!(
                    "INSERT on {} is not granted",
                    self.table(collection)
                )));
            }
        }

        // Check with a row that is rolled back.
        let query = format!(
            "INSERT INTO {} (id, payload) VALUES ($1, '{{}}'::jsonb)",
            self.table(Collection::Detections)
        );
        let mut tx = self.pool.begin().await?;
        sqlx::query(&query).bind(-1i64).execute(&mut *tx).await?;
        tx.rollback().await?;
        Ok(())
    }

    async fn engine_settings(&self) -> StoreResult<EngineSettings> {
        let raw: String = sqlx::query_scalar("SHOW statement_timeout")
            .fetch_one(&self.pool)
            .await?;
        Ok(EngineSettings {
            statement_timeout_secs: parse_pg_duration_secs(&raw),
            max_packet_bytes: None,
        })
    }
}

// ── Private helpers ──────────────────────────────────────────────────────

fn validate_prefix(prefix: &str) -> StoreResult<()> {
    let valid = !prefix.is_empty()
        && prefix.len() <= 32
        && prefix.starts_with(|c: char| c.is_ascii_lowercase())
        && prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidConfig(format!(
            "table prefix '{prefix}' must be a lowercase identifier"
        )))
    }
}

fn to_db_id(id: RecordId) -> StoreResult<i64> {
    i64::try_from(id).map_err(|_| StoreError::InvalidRecord(format!("id {id} exceeds BIGINT")))
}

fn from_row((id, payload): (i64, serde_json::Value)) -> StoreResult<Record> {
    let id = u64::try_from(id)
        .map_err(|_| StoreError::InvalidRecord(format!("negative id {id} in store")))?;
    Ok(Record::new(id, payload))
}

/// Parse a PostgreSQL duration setting (`0`, `500ms`, `30s`, `5min`, `1h`)
/// into whole seconds. `None` means no timeout.
fn parse_pg_duration_secs(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    if value == 0 {
        return None;
    }
    let secs = match unit.trim() {
        "" | "ms" => value / 1000,
        "s" => value,
        "min" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        _ => return None,
    };
    Some(secs)
}
