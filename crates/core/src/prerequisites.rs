//! Prerequisite check model, check identifiers, and thresholds.
//!
//! The checks themselves run in `cutover-migration`; this module defines
//! their fixed order and how results aggregate into a go/no-go decision.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Check identifiers (in execution order)
// ---------------------------------------------------------------------------

pub const CHECK_STATE_IDLE: &str = "state_idle";
pub const CHECK_DISK_SPACE: &str = "disk_space";
pub const CHECK_LEGACY_ACCESSIBLE: &str = "legacy_accessible";
pub const CHECK_LEGACY_INTEGRITY: &str = "legacy_integrity";
pub const CHECK_TABLE_HEALTH: &str = "table_health";
pub const CHECK_TABLE_PERMISSIONS: &str = "table_permissions";
pub const CHECK_WRITE_PERMISSION: &str = "write_permission";
pub const CHECK_RECORD_COUNT: &str = "record_count";
pub const CHECK_EXISTING_TARGET_DATA: &str = "existing_v2_data";
pub const CHECK_MEMORY_AVAILABLE: &str = "memory_available";
pub const CHECK_ENGINE_LIMITS: &str = "engine_limits";

/// Every check id, in the order the checker runs them.
pub const CHECK_ORDER: &[&str] = &[
    CHECK_STATE_IDLE,
    CHECK_DISK_SPACE,
    CHECK_LEGACY_ACCESSIBLE,
    CHECK_LEGACY_INTEGRITY,
    CHECK_TABLE_HEALTH,
    CHECK_TABLE_PERMISSIONS,
    CHECK_WRITE_PERMISSION,
    CHECK_RECORD_COUNT,
    CHECK_EXISTING_TARGET_DATA,
    CHECK_MEMORY_AVAILABLE,
    CHECK_ENGINE_LIMITS,
];

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Minimum free disk space required to start (1 GiB).
pub const MIN_DISK_SPACE_BYTES: u64 = 1024 * 1024 * 1024;

/// Memory below this raises an advisory warning (50 MiB).
pub const MIN_AVAILABLE_MEMORY_BYTES: u64 = 50 * 1024 * 1024;

/// Statement timeouts shorter than this (in seconds) raise a warning.
pub const MIN_STATEMENT_TIMEOUT_SECS: u64 = 600;

/// Packet/message size limits below this raise a warning (16 MiB).
pub const MIN_MAX_PACKET_BYTES: u64 = 16 * 1024 * 1024;

/// Free space needed for a legacy store of `legacy_size` bytes: at least
/// `floor`, or half the legacy size, whichever is larger.
pub fn required_disk_space(legacy_size: u64, floor: u64) -> u64 {
    floor.max(legacy_size / 2)
}

// ---------------------------------------------------------------------------
// Check results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Warning,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    /// Failure blocks the migration from starting.
    Critical,
    /// Failure is reported as a warning only.
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrerequisiteCheck {
    pub id: String,
    pub name: String,
    pub status: CheckStatus,
    pub severity: CheckSeverity,
    pub message: String,
}

impl PrerequisiteCheck {
    pub fn new(
        id: &str,
        name: &str,
        severity: CheckSeverity,
        status: CheckStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status,
            severity,
            message: message.into(),
        }
    }

    /// Whether this result prevents the migration from starting.
    pub fn is_blocking(&self) -> bool {
        self.severity == CheckSeverity::Critical
            && matches!(self.status, CheckStatus::Failed | CheckStatus::Error)
    }
}

/// Ordered results of one prerequisite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrerequisitesResult {
    pub checks: Vec<PrerequisiteCheck>,
    pub critical_failures: usize,
    pub warnings: usize,
    pub can_start_migration: bool,
    pub checked_at: Timestamp,
}

impl PrerequisitesResult {
    pub fn from_checks(checks: Vec<PrerequisiteCheck>) -> Self {
        let critical_failures = checks.iter().filter(|c| c.is_blocking()).count();
        let warnings = checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warning)
            .count();

        Self {
            checks,
            critical_failures,
            warnings,
            can_start_migration: critical_failures == 0,
            checked_at: chrono::Utc::now(),
        }
    }

    /// Ids of the checks that block the migration.
    pub fn failed_check_ids(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| c.is_blocking())
            .map(|c| c.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(id: &str, severity: CheckSeverity, status: CheckStatus) -> PrerequisiteCheck {
        PrerequisiteCheck::new(id, id, severity, status, "")
    }

    #[test]
    fn critical_failures_gate_start() {
        let result = PrerequisitesResult::from_checks(vec![
            check(CHECK_STATE_IDLE, CheckSeverity::Critical, CheckStatus::Passed),
            check(CHECK_DISK_SPACE, CheckSeverity::Critical, CheckStatus::Failed),
            check(CHECK_LEGACY_ACCESSIBLE, CheckSeverity::Critical, CheckStatus::Error),
            check(CHECK_LEGACY_INTEGRITY, CheckSeverity::Critical, CheckStatus::Skipped),
        ]);
        assert_eq!(result.critical_failures, 2);
        assert!(!result.can_start_migration);
        assert_eq!(
            result.failed_check_ids(),
            vec![CHECK_DISK_SPACE.to_string(), CHECK_LEGACY_ACCESSIBLE.to_string()]
        );
    }

    #[test]
    fn warnings_do_not_gate_start() {
        let result = PrerequisitesResult::from_checks(vec![
            check(CHECK_STATE_IDLE, CheckSeverity::Critical, CheckStatus::Passed),
            check(CHECK_MEMORY_AVAILABLE, CheckSeverity::Advisory, CheckStatus::Warning),
            check(CHECK_ENGINE_LIMITS, CheckSeverity::Advisory, CheckStatus::Failed),
        ]);
        assert_eq!(result.critical_failures, 0);
        assert_eq!(result.warnings, 1);
        assert!(result.can_start_migration);
    }

    #[test]
    fn required_disk_space_uses_floor_for_small_stores() {
        assert_eq!(required_disk_space(10, MIN_DISK_SPACE_BYTES), MIN_DISK_SPACE_BYTES);
        assert_eq!(
            required_disk_space(8 * MIN_DISK_SPACE_BYTES, MIN_DISK_SPACE_BYTES),
            4 * MIN_DISK_SPACE_BYTES
        );
    }

    #[test]
    fn check_order_has_no_duplicates() {
        let mut ids: Vec<&str> = CHECK_ORDER.to_vec();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), CHECK_ORDER.len());
    }
}
