//! Backup export jobs.
//!
//! A backup streams every collection of one store into a JSON-lines file
//! under the backup directory. The export writes to a `.partial` file and
//! renames it on success, so a finished file is always complete. Transient
//! store errors are retried a bounded number of times.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cutover_core::error::CoreError;
use cutover_core::jobs::{Job, JobPayload};
use cutover_core::types::{Collection, StoreRole};
use cutover_db::{RecordStore, StoreError};
use cutover_events::bus::{EVENT_BACKUP_COMPLETED, EVENT_BACKUP_FAILED, EVENT_BACKUP_STARTED};
use cutover_events::{EventBus, MigrationEvent};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::{CreateOutcome, JobError, JobRegistry};
use crate::prerequisites::HostResources;

/// Headroom required on top of the estimated export size (100 MiB).
pub const BACKUP_DISK_BUFFER_BYTES: u64 = 100 * 1024 * 1024;

pub const MAX_EXPORT_ATTEMPTS: u32 = 3;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Records fetched per read while exporting.
const EXPORT_PAGE_SIZE: usize = 500;

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, thiserror::Error)]
enum ExportError {
    #[error("export cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

impl ExportError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Unavailable(_)) | Self::Store(StoreError::Database(_))
        )
    }
}

#[derive(Clone)]
pub struct BackupJobManager {
    registry: Arc<JobRegistry>,
    legacy: Arc<dyn RecordStore>,
    target: Arc<dyn RecordStore>,
    host: Arc<dyn HostResources>,
    events: Arc<EventBus>,
    backup_dir: PathBuf,
    retry_delay: Duration,
}

impl BackupJobManager {
    pub fn new(
        registry: Arc<JobRegistry>,
        legacy: Arc<dyn RecordStore>,
        target: Arc<dyn RecordStore>,
        host: Arc<dyn HostResources>,
        events: Arc<EventBus>,
        backup_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            legacy,
            target,
            host,
            events,
            backup_dir,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the pause between export attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn store(&self, role: StoreRole) -> &Arc<dyn RecordStore> {
        match role {
            StoreRole::Legacy => &self.legacy,
            StoreRole::Target => &self.target,
        }
    }

    /// Start a backup of `role`, or return the one already running.
    pub async fn create(&self, role: StoreRole) -> Result<CreateOutcome, JobError> {
        let resource_key = format!("backup:{role}");
        if let Some(active) = self.active_job(&resource_key).await {
            return Ok(CreateOutcome::Existing(active));
        }

        let estimate = self.store(role).info().await?.size_bytes;
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let available = self.host.free_disk_bytes(&self.backup_dir).await?;
        let required = estimate.saturating_add(BACKUP_DISK_BUFFER_BYTES);
        if available < required {
            return Err(JobError::InsufficientStorage {
                required,
                available,
            });
        }

        let outcome = self
            .registry
            .create(
                &resource_key,
                &format!("backup-{role}"),
                JobPayload::Backup {
                    store: role,
                    file_name: None,
                },
            )
            .await;

        if let CreateOutcome::Created(job, cancel) = &outcome {
            let manager = self.clone();
            let job_id = job.job_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { manager.run_export(job_id, role, estimate, cancel).await });
        }
        Ok(outcome)
    }

    pub async fn list(&self, role: Option<StoreRole>) -> Vec<Job> {
        let prefix = match role {
            Some(role) => format!("backup:{role}"),
            None => "backup:".to_string(),
        };
        self.registry.list(&prefix).await
    }

    pub async fn get(&self, job_id: &str) -> Result<Job, CoreError> {
        let job = self.registry.get(job_id).await?;
        if !matches!(job.payload, JobPayload::Backup { .. }) {
            return Err(CoreError::NotFound {
                entity: "backup job",
                id: job_id.to_string(),
            });
        }
        Ok(job)
    }

    /// Path of a completed backup's file.
    pub async fn artifact(&self, job_id: &str) -> Result<(Job, PathBuf), CoreError> {
        self.get(job_id).await?;
        let (job, handle) = self.registry.claim_result(job_id).await?;
        let path = PathBuf::from(handle);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(CoreError::Gone {
                entity: "backup file",
                id: job_id.to_string(),
            });
        }
        Ok((job, path))
    }

    /// Cancel a backup, deleting its file if it already finished.
    pub async fn cancel(&self, job_id: &str) -> Result<Job, CoreError> {
        self.get(job_id).await?;
        let job = self.registry.cancel(job_id).await?;
        if let Some(path) = &job.result_handle {
            remove_quietly(Path::new(path)).await;
        }
        Ok(job)
    }

    /// Purge expired jobs and delete their files.
    pub async fn purge_expired(&self) -> usize {
        let purged = self.registry.purge_expired().await;
        for job in &purged {
            if let (JobPayload::Backup { .. }, Some(path)) = (&job.payload, &job.result_handle) {
                remove_quietly(Path::new(path)).await;
            }
        }
        purged.len()
    }

    /// Remove partial files left behind by an interrupted process.
    pub async fn cleanup_orphans(&self) -> Result<usize, JobError> {
        let mut entries = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(PARTIAL_SUFFIX) {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(
                removed,
                dir = %self.backup_dir.display(),
                "Removed orphaned partial backups"
            );
        }
        Ok(removed)
    }

    async fn active_job(&self, resource_key: &str) -> Option<Job> {
        self.registry
            .list(resource_key)
            .await
            .into_iter()
            .find(|j| j.resource_key == resource_key && !j.status.is_terminal())
    }

    // -- worker --

    async fn run_export(
        self,
        job_id: String,
        role: StoreRole,
        estimate: u64,
        cancel: CancellationToken,
    ) {
        self.registry
            .update(&job_id, |job| {
                job.mark_in_progress();
                job.update_bytes(0, estimate);
            })
            .await;
        self.emit(EVENT_BACKUP_STARTED, &job_id, json!({ "store": role }));

        let mut attempt = 1;
        let result = loop {
            match self.export_once(&job_id, role, estimate, &cancel).await {
                Err(e) if e.is_transient() && attempt < MAX_EXPORT_ATTEMPTS => {
                    tracing::warn!(
                        job_id = %job_id,
                        attempt,
                        error = %e,
                        "Backup export failed, retrying"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => break Err(ExportError::Cancelled),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
                other => break other,
            }
        };

        match result {
            Ok((path, bytes)) => {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
                let handle = path.to_string_lossy().into_owned();
                let still_wanted = self
                    .registry
                    .update(&job_id, |job| {
                        job.update_bytes(bytes, bytes);
                        if let JobPayload::Backup { file_name: name, .. } = &mut job.payload {
                            *name = file_name.clone();
                        }
                        job.complete(Some(handle));
                    })
                    .await;
                if still_wanted {
                    tracing::info!(
                        job_id = %job_id,
                        bytes,
                        path = %path.display(),
                        "Backup completed"
                    );
                    self.emit(
                        EVENT_BACKUP_COMPLETED,
                        &job_id,
                        json!({ "store": role, "bytes": bytes }),
                    );
                } else {
                    remove_quietly(&path).await;
                }
            }
            Err(ExportError::Cancelled) => {
                tracing::info!(job_id = %job_id, "Backup cancelled");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, attempts = attempt, error = %e, "Backup failed");
                let message = e.to_string();
                self.registry.update(&job_id, |job| job.fail(message.clone())).await;
                self.emit(EVENT_BACKUP_FAILED, &job_id, json!({ "store": role, "error": message }));
            }
        }
    }

    async fn export_once(
        &self,
        job_id: &str,
        role: StoreRole,
        estimate: u64,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, u64), ExportError> {
        let name = backup_file_name(role);
        let path = self.backup_dir.join(&name);
        let partial = self.backup_dir.join(format!("{name}{PARTIAL_SUFFIX}"));

        let result = self.write_export(job_id, role, estimate, cancel, &partial).await;
        match result {
            Ok(bytes) => {
                tokio::fs::rename(&partial, &path).await?;
                Ok((path, bytes))
            }
            Err(e) => {
                remove_quietly(&partial).await;
                Err(e)
            }
        }
    }

    async fn write_export(
        &self,
        job_id: &str,
        role: StoreRole,
        estimate: u64,
        cancel: &CancellationToken,
        partial: &Path,
    ) -> Result<u64, ExportError> {
        let store = self.store(role);
        let file = tokio::fs::File::create(partial).await?;
        let mut writer = tokio::io::BufWriter::new(file);
        let mut written = 0u64;

        for collection in Collection::ALL {
            let mut cursor = None;
            loop {
                if cancel.is_cancelled() {
                    return Err(ExportError::Cancelled);
                }
                let page = store.read_batch(collection, cursor, EXPORT_PAGE_SIZE).await?;
                for record in &page {
                    let mut line = serde_json::to_vec(&json!({
                        "collection": collection,
                        "id": record.id,
                        "payload": record.payload,
                    }))?;
                    line.push(b'\n');
                    writer.write_all(&line).await?;
                    written += line.len() as u64;
                }

                let alive = self
                    .registry
                    .update(job_id, |job| job.update_bytes(written, estimate))
                    .await;
                if !alive {
                    return Err(ExportError::Cancelled);
                }

                match page.last() {
                    Some(last) if page.len() == EXPORT_PAGE_SIZE => cursor = Some(last.id),
                    _ => break,
                }
            }
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        Ok(written)
    }

    fn emit(&self, event_type: &str, job_id: &str, payload: serde_json::Value) {
        self.events.publish(
            MigrationEvent::new(event_type)
                .with_source("backup", job_id)
                .with_payload(payload),
        );
    }
}

/// `cutover-<store>-backup-<timestamp>.jsonl`
fn backup_file_name(role: StoreRole) -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f");
    format!("cutover-{role}-backup-{stamp}.jsonl")
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove backup file");
        }
    }
}
