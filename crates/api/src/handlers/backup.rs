//! Handlers for the `/backup` resource.
//!
//! Backups run as background jobs. Creating one for a store that already
//! has a job running returns that job instead of starting a second export.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use cutover_core::jobs::Job;
use cutover_core::types::StoreRole;
use cutover_migration::jobs::CreateOutcome;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Content type of backup exports (one JSON record per line).
const BACKUP_CONTENT_TYPE: &str = "application/x-ndjson";

/// Query parameters selecting the store to back up.
#[derive(Debug, Deserialize)]
pub struct BackupQuery {
    /// `legacy` or `v2`.
    #[serde(rename = "type")]
    pub store_type: Option<String>,
}

impl BackupQuery {
    fn role(&self) -> AppResult<Option<StoreRole>> {
        self.store_type
            .as_deref()
            .map(StoreRole::from_str_value)
            .transpose()
            .map_err(AppError::from)
    }
}

/// GET /api/v1/backup/jobs
///
/// List live backup jobs, newest first, optionally filtered by `?type=`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<BackupQuery>,
) -> AppResult<Json<DataResponse<Vec<Job>>>> {
    let jobs = state.backups.list(params.role()?).await;
    Ok(Json(DataResponse { data: jobs }))
}

/// POST /api/v1/backup/jobs?type={legacy|v2}
///
/// Returns 201 with a new job, or 200 with the job already running for
/// that store. Returns 507 when the backup directory lacks space for the
/// estimated export.
pub async fn create_job(
    State(state): State<AppState>,
    Query(params): Query<BackupQuery>,
) -> AppResult<(StatusCode, Json<DataResponse<Job>>)> {
    let role = params
        .role()?
        .ok_or_else(|| AppError::BadRequest("Query parameter 'type' is required".into()))?;

    let (status, job) = match state.backups.create(role).await? {
        CreateOutcome::Created(job, _) => (StatusCode::CREATED, job),
        CreateOutcome::Existing(job) => (StatusCode::OK, job),
    };
    Ok((status, Json(DataResponse { data: job })))
}

/// GET /api/v1/backup/jobs/{id}
///
/// Returns 410 once the job has passed its retention window.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Job>>> {
    let job = state.backups.get(&id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// DELETE /api/v1/backup/jobs/{id}
///
/// Best-effort cancellation. A running export stops at its next
/// checkpoint; a finished export's file is deleted.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Job>>> {
    let job = state.backups.cancel(&id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/backup/jobs/{id}/download
///
/// Streams the export file. Returns 409 until the job has completed.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let (_, path) = state.backups.artifact(&id).await?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{id}.jsonl"));

    let stream = ReaderStream::new(file);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, BACKUP_CONTENT_TYPE.to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        Body::from_stream(stream),
    ))
}
