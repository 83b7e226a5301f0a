use std::path::PathBuf;

use cutover_core::jobs::DEFAULT_JOB_RETENTION_SECS;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on post-shutdown cleanup in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Directory receiving backup exports (default: `./backups`).
    pub backup_dir: PathBuf,
    /// How long finished jobs stay queryable (default: `3600`).
    pub job_retention_secs: u64,
    /// Interval of the expired-job sweep (default: `300`).
    pub job_sweep_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                    |
    /// |---------------------------|----------------------------|
    /// | `HOST`                    | `0.0.0.0`                  |
    /// | `PORT`                    | `3000`                     |
    /// | `CORS_ORIGINS`            | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `30`                       |
    /// | `BACKUP_DIR`              | `./backups`                |
    /// | `JOB_RETENTION_SECS`      | `3600`                     |
    /// | `JOB_SWEEP_INTERVAL_SECS` | `300`                      |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let backup_dir = PathBuf::from(
            std::env::var("BACKUP_DIR").unwrap_or_else(|_| "./backups".into()),
        );

        let job_retention_secs: u64 = std::env::var("JOB_RETENTION_SECS")
            .unwrap_or_else(|_| DEFAULT_JOB_RETENTION_SECS.to_string())
            .parse()
            .expect("JOB_RETENTION_SECS must be a valid u64");

        let job_sweep_interval_secs: u64 = std::env::var("JOB_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("JOB_SWEEP_INTERVAL_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            backup_dir,
            job_retention_secs,
            job_sweep_interval_secs: job_sweep_interval_secs.max(1),
        }
    }
}

/// Which storage engine backs the legacy and new stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process stores; data does not survive a restart.
    Memory,
    Postgres,
}

/// Storage configuration for the two sides of the migration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Required for the `postgres` backend.
    pub legacy_database_url: Option<String>,
    /// Defaults to the legacy URL, so both stores may share one database.
    pub target_database_url: Option<String>,
    pub legacy_table_prefix: String,
    pub target_table_prefix: String,
    pub db_max_connections: u32,
}

impl StoreConfig {
    /// Load storage configuration from environment variables.
    ///
    /// | Env Var               | Default                   |
    /// |-----------------------|---------------------------|
    /// | `STORE_BACKEND`       | `memory`                  |
    /// | `LEGACY_DATABASE_URL` | unset                     |
    /// | `TARGET_DATABASE_URL` | `LEGACY_DATABASE_URL`     |
    /// | `LEGACY_TABLE_PREFIX` | `legacy`                  |
    /// | `TARGET_TABLE_PREFIX` | `v2`                      |
    /// | `DB_MAX_CONNECTIONS`  | `10`                      |
    pub fn from_env() -> Self {
        let backend = match std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "memory".into())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "postgres" => StoreBackend::Postgres,
            other => panic!("STORE_BACKEND must be 'memory' or 'postgres', got '{other}'"),
        };

        let legacy_database_url = std::env::var("LEGACY_DATABASE_URL").ok();
        let target_database_url = std::env::var("TARGET_DATABASE_URL")
            .ok()
            .or_else(|| legacy_database_url.clone());

        let db_max_connections: u32 = std::env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("DB_MAX_CONNECTIONS must be a valid u32");

        Self {
            backend,
            legacy_database_url,
            target_database_url,
            legacy_table_prefix: std::env::var("LEGACY_TABLE_PREFIX")
                .unwrap_or_else(|_| "legacy".into()),
            target_table_prefix: std::env::var("TARGET_TABLE_PREFIX")
                .unwrap_or_else(|_| "v2".into()),
            db_max_connections,
        }
    }
}
