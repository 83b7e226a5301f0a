use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Record primary keys are unsigned and strictly ordered; the backfill
/// cursor walks them in ascending order.
pub type RecordId = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// Number of backfill phases (one per collection).
pub const TOTAL_PHASES: u32 = 2;

/// A logical record collection. Each collection is migrated in its own
/// backfill phase, detections first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Detections,
    Predictions,
}

impl Collection {
    /// All collections in migration order.
    pub const ALL: [Collection; 2] = [Collection::Detections, Collection::Predictions];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detections => "detections",
            Self::Predictions => "predictions",
        }
    }

    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            "detections" => Ok(Self::Detections),
            "predictions" => Ok(Self::Predictions),
            other => Err(CoreError::Validation(format!(
                "Unknown collection '{other}'. Valid collections: detections, predictions"
            ))),
        }
    }

    /// 1-based phase number of this collection's backfill.
    pub fn phase_number(&self) -> u32 {
        match self {
            Self::Detections => 1,
            Self::Predictions => 2,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully-qualified record identity across collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub collection: Collection,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(collection: Collection, id: RecordId) -> Self {
        Self { collection, id }
    }
}

// ---------------------------------------------------------------------------
// Store roles
// ---------------------------------------------------------------------------

/// Which side of the migration a store sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreRole {
    #[serde(rename = "legacy")]
    Legacy,
    #[serde(rename = "v2")]
    Target,
}

impl StoreRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Target => "v2",
        }
    }

    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            "legacy" => Ok(Self::Legacy),
            "v2" => Ok(Self::Target),
            other => Err(CoreError::Validation(format!(
                "Invalid store type '{other}'. Must be 'legacy' or 'v2'"
            ))),
        }
    }
}

impl std::fmt::Display for StoreRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
