use crate::migration::MigrationState;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    /// The entity existed but has passed its retention window.
    #[error("Entity expired: {entity} with id {id}")]
    Gone { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The requested action is not allowed from the current migration state.
    #[error("Cannot {action} migration while in state '{state}'")]
    InvalidTransition {
        action: &'static str,
        state: MigrationState,
    },

    /// One or more critical prerequisite checks failed.
    #[error("Prerequisite checks failed: {}", check_ids.join(", "))]
    PrerequisitesFailed { check_ids: Vec<String> },

    #[error("Internal error: {0}")]
    Internal(String),
}
