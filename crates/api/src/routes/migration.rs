//! Route definitions for the `/migration` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::migration;
use crate::state::AppState;

/// Routes mounted at `/migration`.
///
/// ```text
/// GET    /status          -> get_status
/// GET    /prerequisites   -> get_prerequisites
/// POST   /start           -> start       ({expected_total?})
/// POST   /pause           -> pause
/// POST   /resume          -> resume
/// POST   /cancel          -> cancel
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(migration::get_status))
        .route("/prerequisites", get(migration::get_prerequisites))
        .route("/start", post(migration::start))
        .route("/pause", post(migration::pause))
        .route("/resume", post(migration::resume))
        .route("/cancel", post(migration::cancel))
}
