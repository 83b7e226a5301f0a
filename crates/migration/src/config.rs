use std::path::PathBuf;
use std::time::Duration;

use cutover_core::prerequisites::MIN_DISK_SPACE_BYTES;

/// Tuning knobs for the migration worker.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Records copied per backfill batch (default: `100`).
    pub batch_size: usize,
    /// Pause between worker steps (default: `0ms`).
    pub batch_pause: Duration,
    /// Dirty-set drain passes before validation gives up (default: `10`).
    pub dirty_drain_max_passes: u32,
    /// Dirty ids re-migrated per chunk within a pass (default: `500`).
    pub dirty_drain_batch: usize,
    /// Records checksummed per collection during validation (default: `100`).
    pub validation_sample_size: usize,
    /// Concurrent background mirror writes (default: `10`).
    pub mirror_max_concurrent: usize,
    /// Free disk space floor for the prerequisite check (default: 1 GiB).
    pub min_disk_space_bytes: u64,
    /// Directory whose filesystem must hold the new store (default: `./data`).
    pub data_dir: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_pause: Duration::ZERO,
            dirty_drain_max_passes: 10,
            dirty_drain_batch: 500,
            validation_sample_size: 100,
            mirror_max_concurrent: 10,
            min_disk_space_bytes: MIN_DISK_SPACE_BYTES,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl MigrationConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default      |
    /// |----------------------------|--------------|
    /// | `MIGRATION_BATCH_SIZE`     | `100`        |
    /// | `MIGRATION_BATCH_PAUSE_MS` | `0`          |
    /// | `DIRTY_DRAIN_MAX_PASSES`   | `10`         |
    /// | `DIRTY_DRAIN_BATCH`        | `500`        |
    /// | `VALIDATION_SAMPLE_SIZE`   | `100`        |
    /// | `MIRROR_MAX_CONCURRENT`    | `10`         |
    /// | `MIN_DISK_SPACE_BYTES`     | `1073741824` |
    /// | `DATA_DIR`                 | `./data`     |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            batch_size: env_or("MIGRATION_BATCH_SIZE", defaults.batch_size).max(1),
            batch_pause: Duration::from_millis(env_or("MIGRATION_BATCH_PAUSE_MS", 0u64)),
            dirty_drain_max_passes: env_or(
                "DIRTY_DRAIN_MAX_PASSES",
                defaults.dirty_drain_max_passes,
            )
            .max(1),
            dirty_drain_batch: env_or("DIRTY_DRAIN_BATCH", defaults.dirty_drain_batch).max(1),
            validation_sample_size: env_or(
                "VALIDATION_SAMPLE_SIZE",
                defaults.validation_sample_size,
            ),
            mirror_max_concurrent: env_or("MIRROR_MAX_CONCURRENT", defaults.mirror_max_concurrent)
                .max(1),
            min_disk_space_bytes: env_or("MIN_DISK_SPACE_BYTES", defaults.min_disk_space_bytes),
            data_dir: std::env::var("DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
        }
    }
}

/// Parse `key` from the environment, falling back to `default` when unset.
///
/// Panics on a value that does not parse; misconfiguration fails fast at
/// startup.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid number, got '{raw}'")),
        Err(_) => default,
    }
}
