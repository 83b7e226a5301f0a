//! Route definitions for the `/legacy` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::legacy;
use crate::state::AppState;

/// Routes mounted at `/legacy`.
///
/// ```text
/// GET    /status    -> get_status
/// POST   /cleanup   -> start_cleanup
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(legacy::get_status))
        .route("/cleanup", post(legacy::start_cleanup))
}
