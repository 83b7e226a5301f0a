//! Legacy cleanup gating and execution.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{seed, spawn, test_config, wait_until, Harness};
use cutover_core::error::CoreError;
use cutover_core::jobs::{JobPayload, JobStatus};
use cutover_core::legacy::{REASON_MIGRATION_INCOMPLETE, REASON_SAME_AS_TARGET};
use cutover_core::migration::MigrationState;
use cutover_core::status::CleanupState;
use cutover_core::types::Collection;
use cutover_db::MemoryStore;
use cutover_migration::jobs::{JobError, JobRegistry, LegacyCleanupCoordinator};

fn coordinator(
    harness: &Harness,
    legacy: &MemoryStore,
    target: &MemoryStore,
) -> LegacyCleanupCoordinator {
    LegacyCleanupCoordinator::new(
        Arc::new(JobRegistry::new(Duration::from_secs(3600))),
        Arc::new(legacy.clone()),
        Arc::new(target.clone()),
        harness.handle.clone(),
        Arc::clone(&harness.events),
    )
}

async fn completed_migration(legacy: &MemoryStore, target: &MemoryStore) -> Harness {
    seed(legacy, Collection::Detections, 30).await;
    seed(legacy, Collection::Predictions, 20).await;
    let harness = spawn(Arc::new(legacy.clone()), Arc::new(target.clone()), test_config());
    harness.handle.start(None).await.unwrap();
    assert_eq!(
        wait_until(&harness.handle, MigrationState::Completed).await,
        MigrationState::Completed
    );
    harness
}

#[tokio::test]
async fn cleanup_is_refused_before_cutover() {
    let legacy = MemoryStore::new("legacy");
    let target = MemoryStore::new("v2");
    seed(&legacy, Collection::Detections, 5).await;
    let harness = spawn(Arc::new(legacy.clone()), Arc::new(target.clone()), test_config());
    let cleanup = coordinator(&harness, &legacy, &target);

    let status = cleanup.legacy_status().await.unwrap();
    assert!(status.exists);
    assert!(!status.can_cleanup);
    assert_eq!(status.total_records, 5);
    assert_eq!(status.reason.as_deref(), Some(REASON_MIGRATION_INCOMPLETE));

    let err = cleanup.start().await.unwrap_err();
    assert_matches!(
        err,
        JobError::Core(CoreError::Conflict(ref reason)) if reason == REASON_MIGRATION_INCOMPLETE
    );
    assert!(!legacy.is_deleted());
}

#[tokio::test]
async fn cleanup_after_cutover_deletes_the_legacy_store() {
    let legacy = MemoryStore::new("legacy");
    let target = MemoryStore::new("v2");
    let harness = completed_migration(&legacy, &target).await;
    let cleanup = coordinator(&harness, &legacy, &target);

    let before = cleanup.legacy_status().await.unwrap();
    assert!(before.can_cleanup);
    assert_eq!(before.total_records, 50);

    let job = cleanup.start().await.unwrap();
    assert_matches!(job.payload, JobPayload::LegacyCleanup { .. });
    assert_ne!(job.status, JobStatus::Failed);

    let mut rx = harness.handle.subscribe_status();
    tokio::time::timeout(Duration::from_secs(10), async {
        while rx.borrow_and_update().cleanup_state != CleanupState::Completed {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("cleanup did not finish");

    assert!(legacy.is_deleted());
    let status = harness.handle.status();
    assert!(status.cleanup_space_reclaimed.unwrap_or_default() > 0);
    assert!(status.cleanup_error.is_none());

    let after = cleanup.legacy_status().await.unwrap();
    assert!(!after.exists);
    assert!(!after.can_cleanup);

    // The new store keeps serving.
    let read = harness
        .handle
        .dual_writer()
        .read(Collection::Detections, 1)
        .await
        .unwrap();
    assert!(read.is_some());
}

#[tokio::test]
async fn cleanup_is_refused_when_stores_share_a_location() {
    let legacy = MemoryStore::with_location("legacy", "memory://shared");
    let target = MemoryStore::with_location("v2", "memory://shared");
    let harness = completed_migration(&legacy, &target).await;
    let cleanup = coordinator(&harness, &legacy, &target);

    let status = cleanup.legacy_status().await.unwrap();
    assert!(!status.can_cleanup);
    assert_eq!(status.reason.as_deref(), Some(REASON_SAME_AS_TARGET));

    assert_matches!(cleanup.start().await, Err(JobError::Core(CoreError::Conflict(_))));
    assert!(!legacy.is_deleted());
}
