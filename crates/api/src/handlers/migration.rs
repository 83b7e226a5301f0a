//! Handlers for the `/migration` resource.
//!
//! Thin wrappers over [`MigrationHandle`](cutover_migration::MigrationHandle).
//! Every mutating call is answered by the migration worker once the
//! transition has been applied, so the returned status already reflects it.

use axum::extract::State;
use axum::Json;
use cutover_core::prerequisites::PrerequisitesResult;
use cutover_core::status::MigrationStatus;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Optional body of `POST /migration/start`.
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    /// Overrides the counted record total used for progress.
    pub expected_total: Option<u64>,
}

/// GET /api/v1/migration/status
pub async fn get_status(State(state): State<AppState>) -> Json<DataResponse<MigrationStatus>> {
    Json(DataResponse {
        data: state.migration.status(),
    })
}

/// GET /api/v1/migration/prerequisites
///
/// Runs every prerequisite check. Failures are reported in the result, not
/// as an error status.
pub async fn get_prerequisites(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<PrerequisitesResult>>> {
    let result = state.migration.check_prerequisites().await?;
    Ok(Json(DataResponse { data: result }))
}

/// POST /api/v1/migration/start
///
/// Starts a migration from `idle`. Repeating the call while a migration is
/// running returns the current status. Returns 412 with `failed_checks`
/// when a critical prerequisite fails.
pub async fn start(
    State(state): State<AppState>,
    body: Option<Json<StartRequest>>,
) -> AppResult<Json<DataResponse<MigrationStatus>>> {
    let Json(request) = body.unwrap_or_default();
    if request.expected_total == Some(0) {
        return Err(AppError::BadRequest(
            "expected_total must be greater than zero".into(),
        ));
    }
    let status = state.migration.start(request.expected_total).await?;
    Ok(Json(DataResponse { data: status }))
}

/// POST /api/v1/migration/pause
pub async fn pause(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<MigrationStatus>>> {
    let status = state.migration.pause().await?;
    Ok(Json(DataResponse { data: status }))
}

/// POST /api/v1/migration/resume
pub async fn resume(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<MigrationStatus>>> {
    let status = state.migration.resume().await?;
    Ok(Json(DataResponse { data: status }))
}

/// POST /api/v1/migration/cancel
///
/// Stops mirroring and discards data copied to the new store, returning to
/// `idle`. Cancelling while idle is a no-op.
pub async fn cancel(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<MigrationStatus>>> {
    let status = state.migration.cancel().await?;
    Ok(Json(DataResponse { data: status }))
}
