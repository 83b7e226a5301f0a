//! Route definitions for the `/backup` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::backup;
use crate::state::AppState;

/// Routes mounted at `/backup`.
///
/// ```text
/// GET    /jobs                 -> list_jobs   (?type=legacy|v2)
/// POST   /jobs                 -> create_job  (?type=legacy|v2)
/// GET    /jobs/{id}            -> get_job
/// DELETE /jobs/{id}            -> cancel_job
/// GET    /jobs/{id}/download   -> download
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(backup::list_jobs).post(backup::create_job))
        .route("/jobs/{id}", get(backup::get_job).delete(backup::cancel_job))
        .route("/jobs/{id}/download", get(backup::download))
}
