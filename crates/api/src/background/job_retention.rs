//! Periodic purge of expired backup and cleanup jobs.
//!
//! Finished jobs stay queryable for the retention window. This task drops
//! them afterwards, deleting backup files with them. Purged ids keep
//! answering "expired" rather than "not found".

use std::time::Duration;

use cutover_migration::jobs::BackupJobManager;
use tokio_util::sync::CancellationToken;

/// Run the job retention loop until `cancel` is triggered.
pub async fn run(backups: BackupJobManager, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Job retention sweeper started");

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention sweeper stopping");
                break;
            }
            _ = ticker.tick() => {
                let purged = backups.purge_expired().await;
                if purged > 0 {
                    tracing::info!(purged, "Job retention: purged expired jobs");
                } else {
                    tracing::debug!("Job retention: nothing to purge");
                }
            }
        }
    }
}
