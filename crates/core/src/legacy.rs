//! Legacy store status and cleanup eligibility rules.

use serde::{Deserialize, Serialize};

use crate::status::CleanupState;
use crate::types::{Collection, Timestamp};

pub const REASON_NOT_FOUND: &str = "No legacy database found";
pub const REASON_MIGRATION_INCOMPLETE: &str =
    "Migration must be completed before legacy cleanup is available";
pub const REASON_SAME_AS_TARGET: &str =
    "Legacy location resolves to the active store; refusing cleanup";
pub const REASON_CLEANUP_RUNNING: &str = "Legacy cleanup is already in progress";

/// Per-collection record count in the legacy store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyTableInfo {
    pub collection: Collection,
    pub record_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyStatus {
    pub exists: bool,
    pub can_cleanup: bool,
    pub location: Option<String>,
    pub size_bytes: u64,
    pub size_human: String,
    pub total_records: u64,
    pub last_modified: Option<Timestamp>,
    pub reason: Option<String>,
    pub tables: Vec<LegacyTableInfo>,
}

impl LegacyStatus {
    /// Status for a legacy store that is gone (never existed or deleted).
    pub fn missing() -> Self {
        Self {
            exists: false,
            can_cleanup: false,
            location: None,
            size_bytes: 0,
            size_human: crate::format::format_bytes(0),
            total_records: 0,
            last_modified: None,
            reason: Some(REASON_NOT_FOUND.to_string()),
            tables: Vec::new(),
        }
    }
}

/// Why cleanup is not allowed right now, or `None` when it is.
pub fn cleanup_block_reason(
    is_v2_only_mode: bool,
    legacy_location: &str,
    target_location: &str,
    cleanup_state: CleanupState,
) -> Option<&'static str> {
    if !is_v2_only_mode {
        return Some(REASON_MIGRATION_INCOMPLETE);
    }
    if legacy_location == target_location {
        return Some(REASON_SAME_AS_TARGET);
    }
    if cleanup_state == CleanupState::InProgress {
        return Some(REASON_CLEANUP_RUNNING);
    }
    None
}
