//! The migration status snapshot.
//!
//! [`MigrationStatus`] is owned and written exclusively by the orchestrator
//! worker. Observers receive clones. Capability and routing flags are
//! recomputed from the state machine on every change via
//! [`MigrationStatus::apply_machine`], never set independently.

use serde::{Deserialize, Serialize};

use crate::migration::{MigrationState, MigrationStateMachine};
use crate::types::{Collection, Timestamp, TOTAL_PHASES};

/// Legacy cleanup lifecycle, embedded in the status for unified reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupState {
    #[default]
    Idle,
    InProgress,
    Completed,
    Failed,
}

impl CleanupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub state: MigrationState,

    pub total_records: u64,
    pub migrated_records: u64,
    /// Records skipped because the transform rejected them.
    pub skipped_records: u64,
    pub progress_percent: f64,

    pub current_phase: Option<Collection>,
    pub phase_number: u32,
    pub total_phases: u32,

    pub records_per_second: f64,
    pub estimated_remaining: Option<String>,
    pub estimated_remaining_secs: Option<u64>,

    pub dirty_id_count: u64,

    pub can_start: bool,
    pub can_pause: bool,
    pub can_resume: bool,
    pub can_cancel: bool,

    pub worker_running: bool,
    pub worker_paused: bool,
    pub is_dual_write_active: bool,
    pub reads_from_new_store: bool,
    pub is_v2_only_mode: bool,

    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,

    pub cleanup_state: CleanupState,
    pub cleanup_error: Option<String>,
    pub cleanup_space_reclaimed: Option<u64>,
}

impl Default for MigrationStatus {
    fn default() -> Self {
        let mut status = Self {
            state: MigrationState::Idle,
            total_records: 0,
            migrated_records: 0,
            skipped_records: 0,
            progress_percent: 0.0,
            current_phase: None,
            phase_number: 0,
            total_phases: TOTAL_PHASES,
            records_per_second: 0.0,
            estimated_remaining: None,
            estimated_remaining_secs: None,
            dirty_id_count: 0,
            can_start: false,
            can_pause: false,
            can_resume: false,
            can_cancel: false,
            worker_running: false,
            worker_paused: false,
            is_dual_write_active: false,
            reads_from_new_store: false,
            is_v2_only_mode: false,
            error_message: None,
            started_at: None,
            completed_at: None,
            cleanup_state: CleanupState::Idle,
            cleanup_error: None,
            cleanup_space_reclaimed: None,
        };
        status.apply_machine(&MigrationStateMachine::new(), true);
        status
    }
}

impl MigrationStatus {
    /// Recompute state-derived fields from `machine`.
    ///
    /// `prerequisites_ok` is the outcome of the most recent prerequisite run
    /// (`true` when none has run yet).
    pub fn apply_machine(&mut self, machine: &MigrationStateMachine, prerequisites_ok: bool) {
        let state = machine.state();
        let effective = machine.effective_state();

        self.state = state;
        self.can_start = state == MigrationState::Idle && prerequisites_ok;
        self.can_pause = state.can_pause();
        self.can_resume = state.can_resume();
        self.can_cancel = state.can_cancel();
        self.worker_running = state.is_active();
        self.worker_paused = state == MigrationState::Paused;
        self.is_dual_write_active = effective.is_dual_write_active();
        self.reads_from_new_store = state.reads_from_new_store();

        if let Some(collection) = effective.phase_collection() {
            self.current_phase = Some(collection);
            self.phase_number = collection.phase_number();
        } else if matches!(
            effective,
            MigrationState::Idle | MigrationState::Initializing | MigrationState::DualWrite
        ) {
            self.current_phase = None;
            self.phase_number = 0;
        } else if effective != MigrationState::Failed {
            // Validation and later: every phase has run.
            self.current_phase = None;
            self.phase_number = TOTAL_PHASES;
        }
    }

    /// Set the migrated counter, revising the total upward if needed so
    /// that `migrated_records <= total_records` always holds.
    pub fn set_progress(&mut self, migrated: u64) {
        self.migrated_records = migrated;
        if self.migrated_records > self.total_records {
            self.total_records = self.migrated_records;
        }
        self.progress_percent = progress_percent(self.migrated_records, self.total_records);
    }

    /// Set the expected total, never below what has already been migrated.
    pub fn set_total(&mut self, total: u64) {
        self.total_records = total.max(self.migrated_records);
        self.progress_percent = progress_percent(self.migrated_records, self.total_records);
    }

    /// Reset every migration counter, keeping cleanup fields intact.
    pub fn reset_progress(&mut self) {
        self.total_records = 0;
        self.migrated_records = 0;
        self.skipped_records = 0;
        self.progress_percent = 0.0;
        self.current_phase = None;
        self.phase_number = 0;
        self.records_per_second = 0.0;
        self.estimated_remaining = None;
        self.estimated_remaining_secs = None;
        self.dirty_id_count = 0;
        self.error_message = None;
        self.started_at = None;
        self.completed_at = None;
    }
}

/// `migrated / total * 100`, clamped to `[0, 100]`. Zero when `total` is 0.
pub fn progress_percent(migrated: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (migrated as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use crate::migration::Transition;

    use super::*;

    #[test]
    fn default_status_is_idle_and_startable() {
        let status = MigrationStatus::default();
        assert_eq!(status.state, MigrationState::Idle);
        assert!(status.can_start);
        assert!(!status.can_pause);
        assert!(!status.can_cancel);
        assert_eq!(status.total_phases, 2);
    }

    #[test]
    fn failed_prerequisites_clear_can_start() {
        let mut status = MigrationStatus::default();
        status.apply_machine(&MigrationStateMachine::new(), false);
        assert!(!status.can_start);
    }

    #[test]
    fn paused_status_keeps_phase_and_mirroring() {
        let mut m = MigrationStateMachine::new();
        for t in [
            Transition::Start,
            Transition::MirroringEnabled,
            Transition::BaselineStarted,
            Transition::DetectionsComplete,
            Transition::Pause,
        ] {
            m.apply(t).unwrap();
        }
        let mut status = MigrationStatus::default();
        status.apply_machine(&m, true);
        assert_eq!(status.state, MigrationState::Paused);
        assert_eq!(status.current_phase, Some(Collection::Predictions));
        assert_eq!(status.phase_number, 2);
        assert!(status.is_dual_write_active);
        assert!(status.worker_paused);
        assert!(!status.worker_running);
        assert!(status.can_resume);
    }

    #[test]
    fn progress_never_exceeds_total() {
        let mut status = MigrationStatus::default();
        status.set_total(100);
        status.set_progress(150);
        assert_eq!(status.total_records, 150);
        assert_eq!(status.progress_percent, 100.0);

        status.set_total(10);
        assert_eq!(status.total_records, 150);
    }

    #[test]
    fn progress_percent_handles_zero_total() {
        assert_eq!(progress_percent(0, 0), 0.0);
        assert_eq!(progress_percent(50, 200), 25.0);
    }

    #[test]
    fn reset_preserves_cleanup_fields() {
        let mut status = MigrationStatus::default();
        status.cleanup_state = CleanupState::Completed;
        status.cleanup_space_reclaimed = Some(42);
        status.set_total(10);
        status.set_progress(5);
        status.reset_progress();
        assert_eq!(status.migrated_records, 0);
        assert_eq!(status.cleanup_state, CleanupState::Completed);
        assert_eq!(status.cleanup_space_reclaimed, Some(42));
    }
}
