//! Shared asynchronous job contract.
//!
//! Backup exports and legacy cleanup both run as [`Job`]s: a common
//! lifecycle (`pending -> in_progress -> completed | failed`) with byte
//! based progress, plus a kind-specific [`JobPayload`].

use serde::{Deserialize, Serialize};

use crate::types::{StoreRole, Timestamp};

/// Terminal jobs are kept for this long before expiring (1 hour).
pub const DEFAULT_JOB_RETENTION_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Kind-specific job details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Backup {
        store: StoreRole,
        file_name: Option<String>,
    },
    LegacyCleanup {
        location: String,
        space_reclaimed: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    /// At most one non-terminal job exists per resource key.
    pub resource_key: String,
    pub status: JobStatus,
    pub progress: f64,
    pub bytes_written: u64,
    pub total_bytes: u64,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub error: Option<String>,
    /// Opaque handle to the finished artifact (a file path for backups).
    #[serde(skip_serializing)]
    pub result_handle: Option<String>,
    #[serde(flatten)]
    pub payload: JobPayload,
}

impl Job {
    pub fn new(job_id: String, resource_key: String, payload: JobPayload) -> Self {
        Self {
            job_id,
            resource_key,
            status: JobStatus::Pending,
            progress: 0.0,
            bytes_written: 0,
            total_bytes: 0,
            started_at: chrono::Utc::now(),
            completed_at: None,
            error: None,
            result_handle: None,
            payload,
        }
    }

    pub fn mark_in_progress(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::InProgress;
        }
    }

    /// Update byte counters. `total_estimate` may be refined as the job
    /// runs; it is raised to `written` if the estimate was too low.
    pub fn update_bytes(&mut self, written: u64, total_estimate: u64) {
        self.bytes_written = written;
        self.total_bytes = total_estimate.max(written);
        self.progress = job_progress(self.bytes_written, self.total_bytes);
    }

    pub fn complete(&mut self, result_handle: Option<String>) {
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.total_bytes = self.total_bytes.max(self.bytes_written);
        self.completed_at = Some(chrono::Utc::now());
        self.result_handle = result_handle;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(chrono::Utc::now());
        self.error = Some(error.into());
    }
}

/// `written / total * 100`, clamped to `[0, 100]`.
pub fn job_progress(written: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (written as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Generate a job id such as `backup-legacy-01920c4e...`.
///
/// UUIDv7 keeps ids time-ordered, so listing by id lists by creation.
pub fn generate_job_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::now_v7().simple())
}
