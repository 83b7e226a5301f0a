//! Integration tests for the `/migration` control surface.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_json, get, post, post_json, seed, wait_for_state};
use cutover_core::migration::MigrationState;
use cutover_core::types::Collection;
use cutover_db::MemoryStore;
use serde_json::json;

/// An app whose backfill is slow enough to act on mid-flight.
async fn slow_app(detections: u64) -> common::TestApp {
    let app = common::build_test_app_configured(
        MemoryStore::new("legacy"),
        MemoryStore::new("v2"),
        |c| {
            c.batch_size = 10;
            c.batch_pause = Duration::from_millis(20);
        },
    );
    seed(&app.legacy, Collection::Detections, detections).await;
    app
}

// ---------------------------------------------------------------------------
// Test: A fresh service reports idle and startable
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_starts_idle() {
    let app = common::build_test_app();
    let response = get(app.app(), "/api/v1/migration/status").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["state"], "idle");
    assert_eq!(json["data"]["can_start"], true);
    assert_eq!(json["data"]["can_pause"], false);
    assert_eq!(json["data"]["migrated_records"], 0);
}

// ---------------------------------------------------------------------------
// Test: Prerequisites report every check and allow starting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prerequisites_pass_on_healthy_stores() {
    let app = common::build_test_app();
    seed(&app.legacy, Collection::Detections, 10).await;

    let response = get(app.app(), "/api/v1/migration/prerequisites").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["can_start_migration"], true);
    assert_eq!(json["data"]["critical_failures"], 0);
    assert!(!json["data"]["checks"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: Pausing while idle is rejected with a typed error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pause_while_idle_returns_409() {
    let app = common::build_test_app();
    let response = post(app.app(), "/api/v1/migration/pause").await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_TRANSITION");
    assert_eq!(json["state"], "idle");
}

// ---------------------------------------------------------------------------
// Test: Cancelling while idle is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_while_idle_is_idempotent() {
    let app = common::build_test_app();
    let response = post(app.app(), "/api/v1/migration/cancel").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["state"], "idle");
}

// ---------------------------------------------------------------------------
// Test: A failing critical check blocks start with 412
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_with_corrupt_legacy_returns_412() {
    let app = common::build_test_app();
    seed(&app.legacy, Collection::Detections, 10).await;
    app.legacy.set_corrupt(true);

    let response = post(app.app(), "/api/v1/migration/start").await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let json = body_json(response).await;
    assert_eq!(json["code"], "PREREQUISITES_FAILED");
    let failed = json["failed_checks"].as_array().unwrap();
    assert!(failed.contains(&json!("legacy_integrity")));

    let status = body_json(get(app.app(), "/api/v1/migration/status").await).await;
    assert_eq!(status["data"]["state"], "idle");
}

// ---------------------------------------------------------------------------
// Test: A zero expected_total is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_with_zero_expected_total_returns_400() {
    let app = common::build_test_app();
    let response = post_json(
        app.app(),
        "/api/v1/migration/start",
        json!({ "expected_total": 0 }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: A full migration runs to completion and switches to the new store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn migration_runs_to_completion() {
    let app = common::build_test_app();
    seed(&app.legacy, Collection::Detections, 120).await;
    seed(&app.legacy, Collection::Predictions, 80).await;

    let response = post(app.app(), "/api/v1/migration/start").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["state"], "initializing");

    wait_for_state(&app, MigrationState::Completed).await;

    let json = body_json(get(app.app(), "/api/v1/migration/status").await).await;
    let data = &json["data"];
    assert_eq!(data["total_records"], 200);
    assert_eq!(data["migrated_records"], 200);
    assert_eq!(data["progress_percent"], 100.0);
    assert_eq!(data["is_v2_only_mode"], true);
    assert_eq!(data["reads_from_new_store"], true);
    assert_eq!(data["dirty_id_count"], 0);
    assert!(data["completed_at"].is_string());

    for collection in [Collection::Detections, Collection::Predictions] {
        assert_eq!(
            app.target.snapshot(collection).await,
            app.legacy.snapshot(collection).await
        );
    }
}

// ---------------------------------------------------------------------------
// Test: Starting again after completion is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_after_completion_returns_409() {
    let app = common::build_test_app();
    seed(&app.legacy, Collection::Detections, 5).await;
    post(app.app(), "/api/v1/migration/start").await;
    wait_for_state(&app, MigrationState::Completed).await;

    let response = post(app.app(), "/api/v1/migration/start").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "INVALID_TRANSITION");
}

// ---------------------------------------------------------------------------
// Test: Repeating start while running returns the current status
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn start_is_idempotent_while_running() {
    let app = slow_app(1000).await;

    let first = post_json(
        app.app(),
        "/api/v1/migration/start",
        json!({ "expected_total": 1000 }),
    )
    .await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_json(first).await["data"]["total_records"], 1000);

    wait_for_state(&app, MigrationState::Migrating).await;
    let again = post(app.app(), "/api/v1/migration/start").await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(body_json(again).await["data"]["state"], "migrating");
}

// ---------------------------------------------------------------------------
// Test: Pause holds progress and resume continues to completion
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn pause_and_resume() {
    let app = slow_app(1000).await;
    post(app.app(), "/api/v1/migration/start").await;
    wait_for_state(&app, MigrationState::Migrating).await;

    let paused = post(app.app(), "/api/v1/migration/pause").await;
    assert_eq!(paused.status(), StatusCode::OK);
    let data = body_json(paused).await["data"].clone();
    assert_eq!(data["state"], "paused");
    assert_eq!(data["can_resume"], true);

    let held = app.state.migration.status().migrated_records;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app.state.migration.status().migrated_records, held);

    // Pausing twice is a no-op.
    let again = post(app.app(), "/api/v1/migration/pause").await;
    assert_eq!(again.status(), StatusCode::OK);

    let resumed = post(app.app(), "/api/v1/migration/resume").await;
    assert_eq!(resumed.status(), StatusCode::OK);
    assert_eq!(body_json(resumed).await["data"]["state"], "migrating");

    wait_for_state(&app, MigrationState::Completed).await;
    assert_eq!(app.state.migration.status().migrated_records, 1000);
}

// ---------------------------------------------------------------------------
// Test: Cancel mid-migration discards copied data and returns to idle
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn cancel_discards_new_store_data() {
    let app = slow_app(1000).await;
    post(app.app(), "/api/v1/migration/start").await;
    wait_for_state(&app, MigrationState::Migrating).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = post(app.app(), "/api/v1/migration/cancel").await;
    assert_eq!(response.status(), StatusCode::OK);

    let data = body_json(response).await["data"].clone();
    assert_eq!(data["state"], "idle");
    assert_eq!(data["migrated_records"], 0);
    assert_eq!(data["is_dual_write_active"], false);
    assert!(app.target.snapshot(Collection::Detections).await.is_empty());

    // A cancelled migration can be started again.
    let restart = post(app.app(), "/api/v1/migration/start").await;
    assert_eq!(restart.status(), StatusCode::OK);
}
