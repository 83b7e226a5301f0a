pub mod backup;
pub mod health;
pub mod legacy;
pub mod migration;
pub mod records;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /migration/status                    current status snapshot (GET)
/// /migration/prerequisites             run prerequisite checks (GET)
/// /migration/start                     start a migration (POST)
/// /migration/pause                     pause (POST)
/// /migration/resume                    resume (POST)
/// /migration/cancel                    cancel and roll back (POST)
///
/// /legacy/status                       legacy store size and eligibility (GET)
/// /legacy/cleanup                      delete the legacy store (POST)
///
/// /backup/jobs                         list, create (GET, POST ?type=)
/// /backup/jobs/{id}                    get, cancel (GET, DELETE)
/// /backup/jobs/{id}/download           download artifact (GET)
///
/// /records/{collection}/{id}           read, write (GET, PUT)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/migration", migration::router())
        .nest("/legacy", legacy::router())
        .nest("/backup", backup::router())
        .nest("/records", records::router())
}
