//! Asynchronous job framework shared by backups and legacy cleanup.
//!
//! [`JobRegistry`] holds every job in memory keyed by id. Creation is
//! deduplicated per resource key: while a non-terminal job exists for a key,
//! creating another returns the existing one. Terminal jobs expire after the
//! retention window; expired ids answer `Gone` rather than `NotFound`.

pub mod backup;
pub mod cleanup;

use std::collections::HashMap;
use std::time::Duration;

use cutover_core::error::CoreError;
use cutover_core::jobs::{generate_job_id, Job, JobPayload, JobStatus};
use cutover_core::types::Timestamp;
use cutover_db::StoreError;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub use backup::BackupJobManager;
pub use cleanup::LegacyCleanupCoordinator;

/// Errors surfaced by the job managers.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Insufficient disk space: {available} bytes free, {required} bytes required")]
    InsufficientStorage { required: u64, available: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of [`JobRegistry::create`].
#[derive(Debug)]
pub enum CreateOutcome {
    /// A new job was registered; the caller runs it and observes the token.
    Created(Job, CancellationToken),
    /// A non-terminal job already exists for the resource key.
    Existing(Job),
}

impl CreateOutcome {
    pub fn job(&self) -> &Job {
        match self {
            Self::Created(job, _) | Self::Existing(job) => job,
        }
    }
}

struct Entry {
    job: Job,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Jobs {
    entries: HashMap<String, Entry>,
    /// Ids purged after expiry, with the time they were purged.
    tombstones: HashMap<String, Timestamp>,
}

pub struct JobRegistry {
    jobs: RwLock<Jobs>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(Jobs::default()),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Register a job for `resource_key`, or return the active one.
    pub async fn create(
        &self,
        resource_key: &str,
        id_prefix: &str,
        payload: JobPayload,
    ) -> CreateOutcome {
        let mut jobs = self.jobs.write().await;

        if let Some(active) = jobs
            .entries
            .values()
            .find(|e| e.job.resource_key == resource_key && !e.job.status.is_terminal())
        {
            return CreateOutcome::Existing(active.job.clone());
        }

        let job = Job::new(generate_job_id(id_prefix), resource_key.to_string(), payload);
        let cancel = CancellationToken::new();
        jobs.entries.insert(
            job.job_id.clone(),
            Entry {
                job: job.clone(),
                cancel: cancel.clone(),
            },
        );
        tracing::info!(job_id = %job.job_id, resource_key, "Job created");
        CreateOutcome::Created(job, cancel)
    }

    pub async fn get(&self, job_id: &str) -> Result<Job, CoreError> {
        let jobs = self.jobs.read().await;
        match jobs.entries.get(job_id) {
            Some(entry) if self.is_expired(&entry.job) => Err(gone(job_id)),
            Some(entry) => Ok(entry.job.clone()),
            None if jobs.tombstones.contains_key(job_id) => Err(gone(job_id)),
            None => Err(not_found(job_id)),
        }
    }

    /// Live jobs whose resource key starts with `prefix`, newest first.
    pub async fn list(&self, prefix: &str) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<Job> = jobs
            .entries
            .values()
            .filter(|e| e.job.resource_key.starts_with(prefix) && !self.is_expired(&e.job))
            .map(|e| e.job.clone())
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        list
    }

    /// Apply `f` to a job. Returns `false` when the job no longer exists,
    /// which tells a running worker it was cancelled.
    pub async fn update(&self, job_id: &str, f: impl FnOnce(&mut Job)) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.entries.get_mut(job_id) {
            Some(entry) => {
                f(&mut entry.job);
                true
            }
            None => false,
        }
    }

    /// Remove a job and signal its worker to stop at the next checkpoint.
    pub async fn cancel(&self, job_id: &str) -> Result<Job, CoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.entries.remove(job_id) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(job_id, status = entry.job.status.as_str(), "Job cancelled");
                Ok(entry.job)
            }
            None if jobs.tombstones.contains_key(job_id) => Err(gone(job_id)),
            None => Err(not_found(job_id)),
        }
    }

    /// The artifact handle of a completed job. Claiming does not change the
    /// job, so it can be claimed repeatedly until it expires.
    pub async fn claim_result(&self, job_id: &str) -> Result<(Job, String), CoreError> {
        let job = self.get(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(CoreError::Conflict(format!(
                "Job {job_id} is not completed (status: {})",
                job.status.as_str()
            )));
        }
        let handle = job.result_handle.clone().ok_or_else(|| {
            CoreError::Internal(format!("Job {job_id} completed without a result"))
        })?;
        Ok((job, handle))
    }

    /// Drop terminal jobs past retention, returning them so callers can
    /// remove their artifacts. Tombstones are kept for one more window.
    pub async fn purge_expired(&self) -> Vec<Job> {
        let mut jobs = self.jobs.write().await;
        let expired: Vec<String> = jobs
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(&e.job))
            .map(|(id, _)| id.clone())
            .collect();

        let now = chrono::Utc::now();
        let mut purged = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(entry) = jobs.entries.remove(&id) {
                jobs.tombstones.insert(id, now);
                purged.push(entry.job);
            }
        }

        let retention = self.retention;
        jobs.tombstones
            .retain(|_, purged_at| !older_than(*purged_at, retention));
        purged
    }

    fn is_expired(&self, job: &Job) -> bool {
        job.status.is_terminal()
            && job
                .completed_at
                .is_some_and(|done| older_than(done, self.retention))
    }
}

fn older_than(at: Timestamp, age: Duration) -> bool {
    (chrono::Utc::now() - at)
        .to_std()
        .is_ok_and(|elapsed| elapsed >= age)
}

fn not_found(job_id: &str) -> CoreError {
    CoreError::NotFound {
        entity: "job",
        id: job_id.to_string(),
    }
}

fn gone(job_id: &str) -> CoreError {
    CoreError::Gone {
        entity: "job",
        id: job_id.to_string(),
    }
}
