//! Pre-start environment checks.
//!
//! [`PrerequisiteChecker::run`] evaluates the checks in a fixed order and
//! returns every result. Critical failures block the migration; advisory
//! ones surface as warnings. Checks that need the legacy store are skipped
//! once it is known to be unreachable.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cutover_core::format::format_bytes;
use cutover_core::migration::MigrationState;
use cutover_core::prerequisites::*;
use cutover_core::types::Collection;
use cutover_db::RecordStore;
use sysinfo::System;

// ---------------------------------------------------------------------------
// Host resources
// ---------------------------------------------------------------------------

/// Host resources consulted by the checks and the backup disk pre-check.
#[async_trait]
pub trait HostResources: Send + Sync {
    /// Free bytes on the filesystem holding `path`.
    async fn free_disk_bytes(&self, path: &Path) -> io::Result<u64>;

    async fn available_memory_bytes(&self) -> io::Result<u64>;
}

/// Reads real host figures via `statvfs` and `sysinfo`.
#[derive(Debug, Clone, Default)]
pub struct SystemResources;

#[async_trait]
impl HostResources for SystemResources {
    async fn free_disk_bytes(&self, path: &Path) -> io::Result<u64> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || statvfs_free_bytes(&path))
            .await
            .map_err(|e| io::Error::other(format!("Disk stats task failed: {e}")))?
    }

    async fn available_memory_bytes(&self) -> io::Result<u64> {
        tokio::task::spawn_blocking(|| {
            let mut sys = System::new();
            sys.refresh_memory();
            sys.available_memory()
        })
        .await
        .map_err(|e| io::Error::other(format!("Memory stats task failed: {e}")))
    }
}

#[cfg(unix)]
fn statvfs_free_bytes(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // Safety: `c_path` is a valid NUL-terminated string and `stat` is only
    // read after the call reports success.
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    let stat = unsafe { stat.assume_init() };
    #[allow(clippy::unnecessary_cast)]
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn statvfs_free_bytes(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "disk statistics are only available on unix",
    ))
}

// ---------------------------------------------------------------------------
// Checker
// ---------------------------------------------------------------------------

pub struct PrerequisiteChecker {
    legacy: Arc<dyn RecordStore>,
    target: Arc<dyn RecordStore>,
    host: Arc<dyn HostResources>,
    data_dir: PathBuf,
    min_disk_space_bytes: u64,
}

impl PrerequisiteChecker {
    pub fn new(
        legacy: Arc<dyn RecordStore>,
        target: Arc<dyn RecordStore>,
        host: Arc<dyn HostResources>,
        data_dir: PathBuf,
        min_disk_space_bytes: u64,
    ) -> Self {
        Self {
            legacy,
            target,
            host,
            data_dir,
            min_disk_space_bytes,
        }
    }

    /// Run every check against the current migration `state`.
    pub async fn run(&self, state: MigrationState) -> PrerequisitesResult {
        let mut checks = Vec::with_capacity(CHECK_ORDER.len());

        checks.push(check_state(state));
        checks.push(self.check_disk_space().await);

        let accessible = self.check_legacy_accessible().await;
        let legacy_up = accessible.status == CheckStatus::Passed;
        checks.push(accessible);

        if legacy_up {
            checks.push(self.check_legacy_integrity().await);
            checks.push(self.check_table_health().await);
            checks.push(self.check_table_permissions().await);
        } else {
            checks.push(skipped(CHECK_LEGACY_INTEGRITY, "Legacy integrity"));
            checks.push(skipped(CHECK_TABLE_HEALTH, "Table health"));
            checks.push(skipped(CHECK_TABLE_PERMISSIONS, "Table permissions"));
        }

        let writable = self.check_write_permission().await;
        let target_up = writable.status == CheckStatus::Passed;
        checks.push(writable);

        checks.push(if legacy_up {
            self.check_record_count().await
        } else {
            skipped(CHECK_RECORD_COUNT, "Record count")
        });
        checks.push(if target_up {
            self.check_existing_target_data().await
        } else {
            skipped(CHECK_EXISTING_TARGET_DATA, "Existing new-store data")
        });

        checks.push(self.check_memory().await);
        checks.push(self.check_engine_limits().await);

        let result = PrerequisitesResult::from_checks(checks);
        tracing::info!(
            can_start = result.can_start_migration,
            critical_failures = result.critical_failures,
            warnings = result.warnings,
            "Prerequisite checks completed"
        );
        result
    }

    async fn check_disk_space(&self) -> PrerequisiteCheck {
        let name = "Disk space";
        let legacy_size = self.legacy.info().await.map_or(0, |info| info.size_bytes);
        let required = required_disk_space(legacy_size, self.min_disk_space_bytes);

        match self.host.free_disk_bytes(&self.data_dir).await {
            Ok(free) if free >= required => critical(
                CHECK_DISK_SPACE,
                name,
                CheckStatus::Passed,
                format!("{} free, {} required", format_bytes(free), format_bytes(required)),
            ),
            Ok(free) => critical(
                CHECK_DISK_SPACE,
                name,
                CheckStatus::Failed,
                format!(
                    "Insufficient disk space: {} free, {} required",
                    format_bytes(free),
                    format_bytes(required)
                ),
            ),
            Err(e) => critical(
                CHECK_DISK_SPACE,
                name,
                CheckStatus::Error,
                format!("Could not read free space for {}: {e}", self.data_dir.display()),
            ),
        }
    }

    async fn check_legacy_accessible(&self) -> PrerequisiteCheck {
        let name = "Legacy store accessible";
        match self.legacy.ping().await {
            Ok(()) => critical(
                CHECK_LEGACY_ACCESSIBLE,
                name,
                CheckStatus::Passed,
                format!("Connected to {}", self.legacy.location()),
            ),
            Err(e) => critical(CHECK_LEGACY_ACCESSIBLE, name, CheckStatus::Failed, e.to_string()),
        }
    }

    async fn check_legacy_integrity(&self) -> PrerequisiteCheck {
        let name = "Legacy integrity";
        match self.legacy.integrity_check().await {
            Ok(()) => critical(
                CHECK_LEGACY_INTEGRITY,
                name,
                CheckStatus::Passed,
                "Integrity check passed",
            ),
            Err(e) => critical(CHECK_LEGACY_INTEGRITY, name, CheckStatus::Failed, e.to_string()),
        }
    }

    async fn check_table_health(&self) -> PrerequisiteCheck {
        let name = "Table health";
        match self.legacy.table_health().await {
            Ok(tables) => {
                let unhealthy: Vec<String> = tables
                    .iter()
                    .filter(|t| !t.exists || !t.healthy)
                    .map(|t| match &t.message {
                        Some(msg) => format!("{}: {msg}", t.collection),
                        None => t.collection.to_string(),
                    })
                    .collect();
                if unhealthy.is_empty() {
                    critical(CHECK_TABLE_HEALTH, name, CheckStatus::Passed, "All tables healthy")
                } else {
                    critical(
                        CHECK_TABLE_HEALTH,
                        name,
                        CheckStatus::Failed,
                        format!("Unhealthy tables: {}", unhealthy.join("; ")),
                    )
                }
            }
            Err(e) => critical(CHECK_TABLE_HEALTH, name, CheckStatus::Error, e.to_string()),
        }
    }

    async fn check_table_permissions(&self) -> PrerequisiteCheck {
        let name = "Table permissions";
        match self.legacy.check_permissions().await {
            Ok(()) => critical(
                CHECK_TABLE_PERMISSIONS,
                name,
                CheckStatus::Passed,
                "Read access confirmed",
            ),
            Err(e) => critical(CHECK_TABLE_PERMISSIONS, name, CheckStatus::Failed, e.to_string()),
        }
    }

    async fn check_write_permission(&self) -> PrerequisiteCheck {
        let name = "New store write permission";
        match self.target.check_write_access().await {
            Ok(()) => critical(
                CHECK_WRITE_PERMISSION,
                name,
                CheckStatus::Passed,
                "Write access confirmed",
            ),
            Err(e) => critical(CHECK_WRITE_PERMISSION, name, CheckStatus::Failed, e.to_string()),
        }
    }

    async fn check_record_count(&self) -> PrerequisiteCheck {
        let name = "Record count";
        match count_all(&*self.legacy).await {
            Ok(total) => critical(
                CHECK_RECORD_COUNT,
                name,
                CheckStatus::Passed,
                format!("{total} records to migrate"),
            ),
            Err(e) => critical(CHECK_RECORD_COUNT, name, CheckStatus::Error, e.to_string()),
        }
    }

    async fn check_existing_target_data(&self) -> PrerequisiteCheck {
        let name = "Existing new-store data";
        match count_all(&*self.target).await {
            Ok(0) => advisory(
                CHECK_EXISTING_TARGET_DATA,
                name,
                CheckStatus::Passed,
                "New store is empty",
            ),
            Ok(n) => advisory(
                CHECK_EXISTING_TARGET_DATA,
                name,
                CheckStatus::Warning,
                format!("New store already holds {n} records; they will be replaced"),
            ),
            Err(e) => advisory(
                CHECK_EXISTING_TARGET_DATA,
                name,
                CheckStatus::Warning,
                e.to_string(),
            ),
        }
    }

    async fn check_memory(&self) -> PrerequisiteCheck {
        let name = "Available memory";
        match self.host.available_memory_bytes().await {
            Ok(bytes) if bytes >= MIN_AVAILABLE_MEMORY_BYTES => advisory(
                CHECK_MEMORY_AVAILABLE,
                name,
                CheckStatus::Passed,
                format!("{} available", format_bytes(bytes)),
            ),
            Ok(bytes) => advisory(
                CHECK_MEMORY_AVAILABLE,
                name,
                CheckStatus::Warning,
                format!(
                    "Low memory: {} available, {} recommended",
                    format_bytes(bytes),
                    format_bytes(MIN_AVAILABLE_MEMORY_BYTES)
                ),
            ),
            Err(e) => advisory(
                CHECK_MEMORY_AVAILABLE,
                name,
                CheckStatus::Warning,
                format!("Could not read available memory: {e}"),
            ),
        }
    }

    async fn check_engine_limits(&self) -> PrerequisiteCheck {
        let name = "Engine limits";
        let settings = match self.target.engine_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                return advisory(CHECK_ENGINE_LIMITS, name, CheckStatus::Skipped, e.to_string())
            }
        };

        let mut problems = Vec::new();
        if let Some(timeout) = settings.statement_timeout_secs {
            if timeout < MIN_STATEMENT_TIMEOUT_SECS {
                problems.push(format!(
                    "statement timeout {timeout}s is below {MIN_STATEMENT_TIMEOUT_SECS}s"
                ));
            }
        }
        if let Some(packet) = settings.max_packet_bytes {
            if packet < MIN_MAX_PACKET_BYTES {
                problems.push(format!(
                    "max packet size {} is below {}",
                    format_bytes(packet),
                    format_bytes(MIN_MAX_PACKET_BYTES)
                ));
            }
        }

        if problems.is_empty() {
            advisory(CHECK_ENGINE_LIMITS, name, CheckStatus::Passed, "Engine limits are sufficient")
        } else {
            advisory(CHECK_ENGINE_LIMITS, name, CheckStatus::Warning, problems.join("; "))
        }
    }
}

// ── Private helpers ──────────────────────────────────────────────────

fn check_state(state: MigrationState) -> PrerequisiteCheck {
    let name = "Migration state";
    if state == MigrationState::Idle {
        critical(CHECK_STATE_IDLE, name, CheckStatus::Passed, "Migration is idle")
    } else {
        critical(
            CHECK_STATE_IDLE,
            name,
            CheckStatus::Failed,
            format!("Migration is '{state}'; it must be idle to start"),
        )
    }
}

fn critical(
    id: &str,
    name: &str,
    status: CheckStatus,
    message: impl Into<String>,
) -> PrerequisiteCheck {
    PrerequisiteCheck::new(id, name, CheckSeverity::Critical, status, message)
}

fn advisory(
    id: &str,
    name: &str,
    status: CheckStatus,
    message: impl Into<String>,
) -> PrerequisiteCheck {
    PrerequisiteCheck::new(id, name, CheckSeverity::Advisory, status, message)
}

fn skipped(id: &str, name: &str) -> PrerequisiteCheck {
    critical(id, name, CheckStatus::Skipped, "Skipped: the store is not reachable")
}

async fn count_all(store: &dyn RecordStore) -> Result<u64, cutover_db::StoreError> {
    let mut total = 0;
    for collection in Collection::ALL {
        total += store.count(collection).await?;
    }
    Ok(total)
}
