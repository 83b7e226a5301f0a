//! Handlers for the `/records` resource.
//!
//! The application write path. Writes go through the dual writer, so while
//! a migration is running they reach the legacy store and are mirrored to
//! the new one; after cutover they go to the new store only. Reads come
//! from whichever store is authoritative.

use axum::extract::{Path, State};
use axum::Json;
use cutover_core::error::CoreError;
use cutover_core::types::{Collection, RecordId};
use cutover_db::Record;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/records/{collection}/{id}
pub async fn get_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, RecordId)>,
) -> AppResult<Json<DataResponse<Record>>> {
    let collection = Collection::from_str_value(&collection)?;
    let record = state
        .migration
        .dual_writer()
        .read(collection, id)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "record",
            id: format!("{collection}/{id}"),
        })?;
    Ok(Json(DataResponse { data: record }))
}

/// PUT /api/v1/records/{collection}/{id}
///
/// Insert or replace a record. The body is the record payload and must be
/// a JSON object.
pub async fn put_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, RecordId)>,
    Json(payload): Json<serde_json::Value>,
) -> AppResult<Json<DataResponse<Record>>> {
    let collection = Collection::from_str_value(&collection)?;
    if !payload.is_object() {
        return Err(AppError::BadRequest(
            "Record payload must be a JSON object".into(),
        ));
    }

    let record = Record::new(id, payload);
    state
        .migration
        .dual_writer()
        .write(collection, record.clone())
        .await?;
    Ok(Json(DataResponse { data: record }))
}
