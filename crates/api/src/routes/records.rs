//! Route definitions for the `/records` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::records;
use crate::state::AppState;

/// Routes mounted at `/records`.
///
/// ```text
/// GET    /{collection}/{id}   -> get_record
/// PUT    /{collection}/{id}   -> put_record
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{collection}/{id}",
        get(records::get_record).put(records::put_record),
    )
}
