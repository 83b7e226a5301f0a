//! Legacy store cleanup.
//!
//! After cutover the legacy store can be permanently deleted to reclaim
//! space. Deletion runs as a job; its outcome is also reflected in the
//! migration status (`cleanup_state`, `cleanup_error`,
//! `cleanup_space_reclaimed`).

use std::sync::Arc;

use cutover_core::error::CoreError;
use cutover_core::format::format_bytes;
use cutover_core::jobs::{Job, JobPayload};
use cutover_core::legacy::{cleanup_block_reason, LegacyStatus, LegacyTableInfo, REASON_NOT_FOUND};
use cutover_core::status::CleanupState;
use cutover_core::types::Collection;
use cutover_db::RecordStore;
use cutover_events::bus::{EVENT_CLEANUP_COMPLETED, EVENT_CLEANUP_FAILED, EVENT_CLEANUP_STARTED};
use cutover_events::{EventBus, MigrationEvent};
use serde_json::json;

use super::{CreateOutcome, JobError, JobRegistry};
use crate::orchestrator::{CleanupUpdate, MigrationHandle};

const CLEANUP_RESOURCE_KEY: &str = "cleanup:legacy";

#[derive(Clone)]
pub struct LegacyCleanupCoordinator {
    registry: Arc<JobRegistry>,
    legacy: Arc<dyn RecordStore>,
    target: Arc<dyn RecordStore>,
    migration: MigrationHandle,
    events: Arc<EventBus>,
}

impl LegacyCleanupCoordinator {
    pub fn new(
        registry: Arc<JobRegistry>,
        legacy: Arc<dyn RecordStore>,
        target: Arc<dyn RecordStore>,
        migration: MigrationHandle,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            legacy,
            target,
            migration,
            events,
        }
    }

    /// Size, record counts and cleanup eligibility of the legacy store.
    pub async fn legacy_status(&self) -> Result<LegacyStatus, JobError> {
        let info = self.legacy.info().await?;
        if !info.exists {
            return Ok(LegacyStatus::missing());
        }

        let mut tables = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            tables.push(LegacyTableInfo {
                collection,
                record_count: self.legacy.count(collection).await?,
            });
        }

        let status = self.migration.status();
        let reason = cleanup_block_reason(
            status.is_v2_only_mode,
            &self.legacy.location(),
            &self.target.location(),
            status.cleanup_state,
        );

        Ok(LegacyStatus {
            exists: true,
            can_cleanup: reason.is_none(),
            location: Some(info.location),
            size_bytes: info.size_bytes,
            size_human: format_bytes(info.size_bytes),
            total_records: tables.iter().map(|t| t.record_count).sum(),
            last_modified: info.last_modified,
            reason: reason.map(str::to_string),
            tables,
        })
    }

    /// Start deleting the legacy store. Returns the running job if one is
    /// already in progress.
    pub async fn start(&self) -> Result<Job, JobError> {
        let status = self.legacy_status().await?;
        if !status.exists {
            return Err(CoreError::Conflict(REASON_NOT_FOUND.into()).into());
        }
        if let Some(reason) = &status.reason {
            if let Some(active) = self.active_job().await {
                return Ok(active);
            }
            return Err(CoreError::Conflict(reason.clone()).into());
        }

        let location = status.location.clone().unwrap_or_default();
        let outcome = self
            .registry
            .create(
                CLEANUP_RESOURCE_KEY,
                "cleanup",
                JobPayload::LegacyCleanup {
                    location: location.clone(),
                    space_reclaimed: None,
                },
            )
            .await;

        let job = match outcome {
            CreateOutcome::Existing(job) => return Ok(job),
            CreateOutcome::Created(job, _) => job,
        };

        self.migration
            .record_cleanup(CleanupUpdate {
                state: CleanupState::InProgress,
                error: None,
                space_reclaimed: None,
            })
            .await?;
        self.emit(EVENT_CLEANUP_STARTED, &job.job_id, json!({ "location": location }));

        let coordinator = self.clone();
        let job_id = job.job_id.clone();
        let size = status.size_bytes;
        tokio::spawn(async move { coordinator.run(job_id, size).await });
        Ok(job)
    }

    async fn active_job(&self) -> Option<Job> {
        self.registry
            .list(CLEANUP_RESOURCE_KEY)
            .await
            .into_iter()
            .find(|j| !j.status.is_terminal())
    }

    async fn run(self, job_id: String, size: u64) {
        self.registry
            .update(&job_id, |job| {
                job.mark_in_progress();
                job.update_bytes(0, size);
            })
            .await;

        let (update, event) = match self.legacy.delete().await {
            Ok(freed) => {
                self.registry
                    .update(&job_id, |job| {
                        job.update_bytes(freed, freed);
                        if let JobPayload::LegacyCleanup {
                            space_reclaimed, ..
                        } = &mut job.payload
                        {
                            *space_reclaimed = Some(freed);
                        }
                        job.complete(None);
                    })
                    .await;
                tracing::info!(
                    job_id = %job_id,
                    freed = %format_bytes(freed),
                    "Legacy store deleted"
                );
                (
                    CleanupUpdate {
                        state: CleanupState::Completed,
                        error: None,
                        space_reclaimed: Some(freed),
                    },
                    (EVENT_CLEANUP_COMPLETED, json!({ "space_reclaimed": freed })),
                )
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(job_id = %job_id, error = %message, "Legacy cleanup failed");
                self.registry
                    .update(&job_id, |job| job.fail(message.clone()))
                    .await;
                (
                    CleanupUpdate {
                        state: CleanupState::Failed,
                        error: Some(message.clone()),
                        space_reclaimed: None,
                    },
                    (EVENT_CLEANUP_FAILED, json!({ "error": message })),
                )
            }
        };

        if let Err(e) = self.migration.record_cleanup(update).await {
            tracing::warn!(job_id = %job_id, error = %e, "Could not record cleanup outcome");
        }
        self.emit(event.0, &job_id, event.1);
    }

    fn emit(&self, event_type: &str, job_id: &str, payload: serde_json::Value) {
        self.events.publish(
            MigrationEvent::new(event_type)
                .with_source("cleanup", job_id)
                .with_payload(payload),
        );
    }
}
