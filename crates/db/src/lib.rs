//! Storage engines for the cutover migration service.
//!
//! The migration runtime only sees the [`RecordStore`] port. Two adapters
//! implement it: [`MemoryStore`] for tests and single-process deployments,
//! and [`PgRecordStore`] for PostgreSQL-backed collections.

use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgRecordStore;
pub use record::Record;
pub use store::{RecordStore, StoreError, StoreResult};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run a trivial query to confirm the pool can reach the database.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
