//! Handlers for the `/legacy` resource.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use cutover_core::jobs::Job;
use cutover_core::legacy::LegacyStatus;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/legacy/status
///
/// Size, per-collection record counts and whether the legacy store may be
/// deleted yet.
pub async fn get_status(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<LegacyStatus>>> {
    let status = state.cleanup.legacy_status().await?;
    Ok(Json(DataResponse { data: status }))
}

/// POST /api/v1/legacy/cleanup
///
/// Starts deleting the legacy store in the background and returns 202 with
/// the cleanup job. Returns 409 with the blocking reason when the migration
/// has not completed or the legacy store is the one serving traffic.
pub async fn start_cleanup(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, Json<DataResponse<Job>>)> {
    let job = state.cleanup.start().await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}
