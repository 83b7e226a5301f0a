//! Integration tests for the `/backup/jobs` resource.

mod common;

use std::time::Duration;

use axum::http::{header, StatusCode};
use common::{body_bytes, body_json, delete, get, post, seed};
use cutover_core::types::Collection;

/// Poll a backup job until it leaves `pending`/`in_progress`.
async fn wait_for_job(app: &common::TestApp, id: &str) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = body_json(get(app.app(), &format!("/api/v1/backup/jobs/{id}")).await).await;
        let status = job["data"]["status"].as_str().unwrap_or_default().to_string();
        if status != "pending" && status != "in_progress" {
            return job["data"].clone();
        }
        assert!(tokio::time::Instant::now() < deadline, "backup {id} did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Test: Creating a backup without a store type returns 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_without_type_returns_400() {
    let app = common::build_test_app();
    let response = post(app.app(), "/api/v1/backup/jobs").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Test: An unknown store type returns 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_with_unknown_type_returns_400() {
    let app = common::build_test_app();
    let response = post(app.app(), "/api/v1/backup/jobs?type=archive").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Test: A backup runs to completion and its file can be downloaded
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backup_completes_and_downloads() {
    let app = common::build_test_app();
    seed(&app.legacy, Collection::Detections, 40).await;
    seed(&app.legacy, Collection::Predictions, 10).await;

    let response = post(app.app(), "/api/v1/backup/jobs?type=legacy").await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await["data"].clone();
    assert_eq!(created["kind"], "backup");
    assert_eq!(created["store"], "legacy");
    let id = created["job_id"].as_str().unwrap().to_string();

    let job = wait_for_job(&app, &id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["progress"], 100.0);

    let response = get(app.app(), &format!("/api/v1/backup/jobs/{id}/download")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"cutover-legacy-backup-"));

    let bytes = body_bytes(response).await;
    let text = String::from_utf8(bytes).unwrap();
    assert_eq!(text.lines().count(), 50);
    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["collection"], "detections");
}

// ---------------------------------------------------------------------------
// Test: A second create while one is running returns the existing job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_while_running_returns_existing_job() {
    let app = common::build_test_app();
    seed(&app.legacy, Collection::Detections, 5000).await;

    let first = post(app.app(), "/api/v1/backup/jobs?type=legacy").await;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_id = body_json(first).await["data"]["job_id"].clone();

    let second = post(app.app(), "/api/v1/backup/jobs?type=legacy").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_json(second).await["data"]["job_id"], first_id);
}

// ---------------------------------------------------------------------------
// Test: Download before completion is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn download_before_completion_returns_409() {
    let app = common::build_test_app();
    seed(&app.legacy, Collection::Detections, 5000).await;

    let created = body_json(post(app.app(), "/api/v1/backup/jobs?type=legacy").await).await;
    let id = created["data"]["job_id"].as_str().unwrap().to_string();

    let response = get(app.app(), &format!("/api/v1/backup/jobs/{id}/download")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Test: Listing filters by store type
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_filters_by_type() {
    let app = common::build_test_app();
    seed(&app.legacy, Collection::Detections, 3).await;

    let created = body_json(post(app.app(), "/api/v1/backup/jobs?type=legacy").await).await;
    let id = created["data"]["job_id"].as_str().unwrap().to_string();
    wait_for_job(&app, &id).await;

    let legacy = body_json(get(app.app(), "/api/v1/backup/jobs?type=legacy").await).await;
    assert_eq!(legacy["data"].as_array().unwrap().len(), 1);

    let target = body_json(get(app.app(), "/api/v1/backup/jobs?type=v2").await).await;
    assert!(target["data"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Test: Unknown job id returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = common::build_test_app();
    let response = get(app.app(), "/api/v1/backup/jobs/backup-legacy-missing").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: Deleting a finished backup removes the job and its file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_removes_job_and_file() {
    let app = common::build_test_app();
    seed(&app.legacy, Collection::Detections, 3).await;

    let created = body_json(post(app.app(), "/api/v1/backup/jobs?type=legacy").await).await;
    let id = created["data"]["job_id"].as_str().unwrap().to_string();
    wait_for_job(&app, &id).await;

    let response = delete(app.app(), &format!("/api/v1/backup/jobs/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(app.app(), &format!("/api/v1/backup/jobs/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let mut entries = tokio::fs::read_dir(app.state.backups.backup_dir()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}
