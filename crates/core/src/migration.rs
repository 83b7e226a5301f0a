//! Migration state machine.
//!
//! [`MigrationState`] is a closed enum and every transition goes through
//! [`MigrationStateMachine::apply`], which owns the transition table. The
//! orchestrator never assigns a state directly.
//!
//! ```text
//! idle ──Start──> initializing ──> dual_write ──> migrating
//!   ^                                               │
//!   │                                     migrating_predictions
//!   │                                               │
//! Cancel <── (any active except cutover)       validating ──fail──> failed
//!                                                   │
//!                                                cutover ──> completed
//! ```

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Collection;

// ---------------------------------------------------------------------------
// MigrationState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Idle,
    Initializing,
    DualWrite,
    Migrating,
    MigratingPredictions,
    Validating,
    Cutover,
    Paused,
    Completed,
    Failed,
}

impl MigrationState {
    /// Every state, in lifecycle order.
    pub const ALL: [MigrationState; 10] = [
        Self::Idle,
        Self::Initializing,
        Self::DualWrite,
        Self::Migrating,
        Self::MigratingPredictions,
        Self::Validating,
        Self::Cutover,
        Self::Paused,
        Self::Completed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::DualWrite => "dual_write",
            Self::Migrating => "migrating",
            Self::MigratingPredictions => "migrating_predictions",
            Self::Validating => "validating",
            Self::Cutover => "cutover",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// A phase the background worker is actively driving.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Initializing
                | Self::DualWrite
                | Self::Migrating
                | Self::MigratingPredictions
                | Self::Validating
                | Self::Cutover
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Pausable states. `initializing` and `cutover` run to completion.
    pub fn can_pause(&self) -> bool {
        matches!(
            self,
            Self::DualWrite | Self::Migrating | Self::MigratingPredictions | Self::Validating
        )
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, Self::Paused)
    }

    pub fn can_cancel(&self) -> bool {
        !matches!(self, Self::Idle | Self::Completed | Self::Cutover)
    }

    /// Legacy writes are mirrored to the new store in these states.
    pub fn is_dual_write_active(&self) -> bool {
        matches!(
            self,
            Self::DualWrite
                | Self::Migrating
                | Self::MigratingPredictions
                | Self::Validating
                | Self::Cutover
        )
    }

    /// The new store is the authority for reads.
    pub fn reads_from_new_store(&self) -> bool {
        matches!(self, Self::Cutover | Self::Completed)
    }

    /// Collection being backfilled in this state, if any.
    pub fn phase_collection(&self) -> Option<Collection> {
        match self {
            Self::Migrating => Some(Collection::Detections),
            Self::MigratingPredictions => Some(Collection::Predictions),
            _ => None,
        }
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Inputs to the state machine. User actions (`Start`, `Pause`, `Resume`,
/// `Cancel`) and worker milestones share one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    MirroringEnabled,
    BaselineStarted,
    DetectionsComplete,
    PredictionsComplete,
    ValidationPassed,
    CutoverComplete,
    Fail,
    Pause,
    Resume,
    Cancel,
}

impl Transition {
    /// Verb used in rejection messages.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::MirroringEnabled => "enable mirroring for",
            Self::BaselineStarted => "begin backfill for",
            Self::DetectionsComplete => "finish detections phase for",
            Self::PredictionsComplete => "finish predictions phase for",
            Self::ValidationPassed => "cut over",
            Self::CutoverComplete => "complete",
            Self::Fail => "fail",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }
}

// ---------------------------------------------------------------------------
// MigrationStateMachine
// ---------------------------------------------------------------------------

/// Current state plus the phase to return to on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStateMachine {
    state: MigrationState,
    paused_from: Option<MigrationState>,
}

impl Default for MigrationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationStateMachine {
    pub fn new() -> Self {
        Self {
            state: MigrationState::Idle,
            paused_from: None,
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// The phase a paused migration resumes into.
    pub fn paused_from(&self) -> Option<MigrationState> {
        self.paused_from
    }

    /// The phase the migration is logically in, looking through `paused`.
    pub fn effective_state(&self) -> MigrationState {
        self.paused_from.unwrap_or(self.state)
    }

    /// Compute the target of `transition` without applying it.
    pub fn next_state(&self, transition: Transition) -> Result<MigrationState, CoreError> {
        use MigrationState as S;

        let next = match (transition, self.state) {
            (Transition::Start, S::Idle) => Some(S::Initializing),
            (Transition::MirroringEnabled, S::Initializing) => Some(S::DualWrite),
            (Transition::BaselineStarted, S::DualWrite) => Some(S::Migrating),
            (Transition::DetectionsComplete, S::Migrating) => Some(S::MigratingPredictions),
            (Transition::PredictionsComplete, S::MigratingPredictions) => Some(S::Validating),
            (Transition::ValidationPassed, S::Validating) => Some(S::Cutover),
            (Transition::CutoverComplete, S::Cutover) => Some(S::Completed),
            (Transition::Fail, s) if s.is_active() => Some(S::Failed),
            (Transition::Pause, s) if s.can_pause() => Some(S::Paused),
            (Transition::Resume, S::Paused) => self.paused_from,
            (Transition::Cancel, s) if s.can_cancel() => Some(S::Idle),
            _ => None,
        };

        next.ok_or(CoreError::InvalidTransition {
            action: transition.action(),
            state: self.state,
        })
    }

    /// Apply `transition`, returning the new state. The machine is left
    /// untouched when the transition is rejected.
    pub fn apply(&mut self, transition: Transition) -> Result<MigrationState, CoreError> {
        let next = self.next_state(transition)?;

        self.paused_from = match transition {
            Transition::Pause => Some(self.state),
            _ => None,
        };
        self.state = next;
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn machine_in(path: &[Transition]) -> MigrationStateMachine {
        let mut m = MigrationStateMachine::new();
        for t in path {
            m.apply(*t).unwrap();
        }
        m
    }

    const TO_VALIDATING: &[Transition] = &[
        Transition::Start,
        Transition::MirroringEnabled,
        Transition::BaselineStarted,
        Transition::DetectionsComplete,
        Transition::PredictionsComplete,
    ];

    // -- happy path --

    #[test]
    fn full_lifecycle_reaches_completed() {
        let mut m = machine_in(TO_VALIDATING);
        assert_eq!(m.state(), MigrationState::Validating);
        m.apply(Transition::ValidationPassed).unwrap();
        assert_eq!(m.state(), MigrationState::Cutover);
        m.apply(Transition::CutoverComplete).unwrap();
        assert_eq!(m.state(), MigrationState::Completed);
    }

    #[test]
    fn completed_is_terminal() {
        let mut m = machine_in(TO_VALIDATING);
        m.apply(Transition::ValidationPassed).unwrap();
        m.apply(Transition::CutoverComplete).unwrap();
        for t in [
            Transition::Start,
            Transition::Pause,
            Transition::Resume,
            Transition::Cancel,
            Transition::Fail,
        ] {
            assert!(m.apply(t).is_err(), "{t:?} must be rejected from completed");
        }
    }

    // -- pause / resume --

    #[test]
    fn resume_returns_to_prior_phase() {
        let mut m = machine_in(&[
            Transition::Start,
            Transition::MirroringEnabled,
            Transition::BaselineStarted,
        ]);
        m.apply(Transition::Pause).unwrap();
        assert_eq!(m.state(), MigrationState::Paused);
        assert_eq!(m.effective_state(), MigrationState::Migrating);
        m.apply(Transition::Resume).unwrap();
        assert_eq!(m.state(), MigrationState::Migrating);
        assert_eq!(m.paused_from(), None);
    }

    #[test]
    fn cutover_cannot_be_paused_or_cancelled() {
        let mut m = machine_in(TO_VALIDATING);
        m.apply(Transition::ValidationPassed).unwrap();
        assert_matches!(
            m.apply(Transition::Pause),
            Err(CoreError::InvalidTransition { action: "pause", state: MigrationState::Cutover })
        );
        assert!(m.apply(Transition::Cancel).is_err());
        assert_eq!(m.state(), MigrationState::Cutover);
    }

    #[test]
    fn initializing_is_not_pausable() {
        let mut m = machine_in(&[Transition::Start]);
        assert!(m.apply(Transition::Pause).is_err());
    }

    // -- cancel / fail --

    #[test]
    fn cancel_from_paused_returns_idle_and_clears_resume_target() {
        let mut m = machine_in(TO_VALIDATING);
        m.apply(Transition::Pause).unwrap();
        m.apply(Transition::Cancel).unwrap();
        assert_eq!(m.state(), MigrationState::Idle);
        assert_eq!(m.paused_from(), None);
    }

    #[test]
    fn cancel_recovers_from_failed() {
        let mut m = machine_in(TO_VALIDATING);
        m.apply(Transition::Fail).unwrap();
        assert_eq!(m.state(), MigrationState::Failed);
        m.apply(Transition::Cancel).unwrap();
        assert_eq!(m.state(), MigrationState::Idle);
    }

    #[test]
    fn cutover_failure_escalates_to_failed() {
        let mut m = machine_in(TO_VALIDATING);
        m.apply(Transition::ValidationPassed).unwrap();
        assert_eq!(m.apply(Transition::Fail).unwrap(), MigrationState::Failed);
    }

    #[test]
    fn pause_while_idle_is_rejected_without_change() {
        let mut m = MigrationStateMachine::new();
        let err = m.apply(Transition::Pause).unwrap_err();
        assert_eq!(err.to_string(), "Cannot pause migration while in state 'idle'");
        assert_eq!(m.state(), MigrationState::Idle);
    }

    // -- flags --

    #[test]
    fn routing_flags_follow_phase() {
        assert!(!MigrationState::Initializing.is_dual_write_active());
        assert!(MigrationState::DualWrite.is_dual_write_active());
        assert!(MigrationState::Cutover.is_dual_write_active());
        assert!(!MigrationState::Completed.is_dual_write_active());
        assert!(MigrationState::Cutover.reads_from_new_store());
        assert!(MigrationState::Completed.reads_from_new_store());
        assert!(!MigrationState::Validating.reads_from_new_store());
    }

    #[test]
    fn phase_collection_maps_backfill_states() {
        assert_eq!(
            MigrationState::Migrating.phase_collection(),
            Some(Collection::Detections)
        );
        assert_eq!(
            MigrationState::MigratingPredictions.phase_collection(),
            Some(Collection::Predictions)
        );
        assert_eq!(MigrationState::Validating.phase_collection(), None);
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&MigrationState::MigratingPredictions).unwrap();
        assert_eq!(json, "\"migrating_predictions\"");
    }
}
