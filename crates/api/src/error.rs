use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cutover_core::error::CoreError;
use cutover_db::StoreError;
use cutover_migration::jobs::JobError;
use cutover_migration::mirror::WriteError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `cutover_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A storage engine error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Not enough free disk space to start a backup.
    #[error("Insufficient storage: {available} bytes free, {required} bytes required")]
    InsufficientStorage { required: u64, available: u64 },

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Core(e) => Self::Core(e),
            JobError::Store(e) => Self::Store(e),
            JobError::InsufficientStorage {
                required,
                available,
            } => Self::InsufficientStorage {
                required,
                available,
            },
            JobError::Io(e) => Self::InternalError(e.to_string()),
        }
    }
}

impl From<WriteError> for AppError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Store(e) => Self::Store(e),
            WriteError::Transform(e) => Self::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut details = serde_json::Map::new();

        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Gone { entity, id } => (
                    StatusCode::GONE,
                    "EXPIRED",
                    format!("{entity} with id {id} has expired"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::InvalidTransition { state, .. } => {
                    details.insert("state".into(), json!(state));
                    (StatusCode::CONFLICT, "INVALID_TRANSITION", core.to_string())
                }
                CoreError::PrerequisitesFailed { check_ids } => {
                    details.insert("failed_checks".into(), json!(check_ids));
                    (
                        StatusCode::PRECONDITION_FAILED,
                        "PREREQUISITES_FAILED",
                        core.to_string(),
                    )
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- Store errors ---
            AppError::Store(err) => classify_store_error(err),

            // --- HTTP-specific errors ---
            AppError::InsufficientStorage {
                required,
                available,
            } => {
                details.insert("required_bytes".into(), json!(required));
                details.insert("available_bytes".into(), json!(available));
                (
                    StatusCode::INSUFFICIENT_STORAGE,
                    "INSUFFICIENT_STORAGE",
                    self.to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let Some(obj) = body.as_object_mut() {
            obj.extend(details);
        }

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a store error into an HTTP status, error code, and message.
///
/// - An unreachable or deleted store maps to 503.
/// - A rejected record maps to 400.
/// - Everything else maps to 500 with a sanitized message.
fn classify_store_error(err: &StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::Unavailable(_) | StoreError::Deleted(_) | StoreError::PermissionDenied(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "STORE_UNAVAILABLE",
            err.to_string(),
        ),
        StoreError::InvalidRecord(msg) => (StatusCode::BAD_REQUEST, "INVALID_RECORD", msg.clone()),
        StoreError::Database(db_err) => classify_sqlx_error(db_err),
        other => {
            tracing::error!(error = %other, "Store error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

/// Connection-level sqlx failures map to 503; everything else maps to 500
/// with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, "Database error");
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "STORE_UNAVAILABLE",
            "The database is unavailable".to_string(),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "An internal error occurred".to_string(),
        ),
    }
}
