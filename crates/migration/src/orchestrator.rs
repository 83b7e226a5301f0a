//! Migration orchestrator.
//!
//! A single background task owns the state machine, the status snapshot and
//! every phase of the run. Control requests arrive over an mpsc channel and
//! are answered on a oneshot; observers read the latest [`MigrationStatus`]
//! from a watch channel. Between commands the worker advances the active
//! phase one bounded step at a time:
//!
//! ```text
//! initializing -> dual_write -> migrating -> migrating_predictions
//!     -> validating (drain dirty set, then check) -> cutover -> completed
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use cutover_core::error::CoreError;
use cutover_core::migration::{MigrationState, MigrationStateMachine, Transition};
use cutover_core::prerequisites::PrerequisitesResult;
use cutover_core::rate::{format_duration, RateWindow};
use cutover_core::status::{CleanupState, MigrationStatus};
use cutover_core::types::{Collection, RecordId, RecordKey};
use cutover_db::{RecordStore, StoreError};
use cutover_events::bus::{
    EVENT_MIGRATION_CANCELLED, EVENT_MIGRATION_COMPLETED, EVENT_MIGRATION_FAILED,
    EVENT_MIGRATION_PAUSED, EVENT_MIGRATION_PROGRESS, EVENT_MIGRATION_RESUMED,
    EVENT_MIGRATION_STARTED, EVENT_MIGRATION_STATE_CHANGED,
};
use cutover_events::{EventBus, MigrationEvent};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backfill::{BackfillEngine, BackfillError, SkippedRecords};
use crate::config::MigrationConfig;
use crate::dirty_set::DirtySetTracker;
use crate::mirror::{DualWriter, MirrorControl, WriteMode};
use crate::prerequisites::{PrerequisiteChecker, HostResources};
use crate::transform::RecordTransform;
use crate::validator::{ValidationFailure, Validator};

/// Pending control requests before senders wait.
const COMMAND_BUFFER: usize = 32;

/// External collaborators of the migration worker.
pub struct MigrationDeps {
    pub legacy: Arc<dyn RecordStore>,
    pub target: Arc<dyn RecordStore>,
    pub transform: Arc<dyn RecordTransform>,
    pub host: Arc<dyn HostResources>,
    pub events: Arc<EventBus>,
}

/// Cleanup progress reported back into the migration status.
#[derive(Debug, Clone)]
pub struct CleanupUpdate {
    pub state: CleanupState,
    pub error: Option<String>,
    pub space_reclaimed: Option<u64>,
}

type Reply<T> = oneshot::Sender<Result<T, CoreError>>;

enum Command {
    CheckPrerequisites { reply: Reply<PrerequisitesResult> },
    Start { expected_total: Option<u64>, reply: Reply<MigrationStatus> },
    Pause { reply: Reply<MigrationStatus> },
    Resume { reply: Reply<MigrationStatus> },
    Cancel { reply: Reply<MigrationStatus> },
    RecordCleanup { update: CleanupUpdate, reply: Reply<MigrationStatus> },
}

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Backfill(#[from] BackfillError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("{store} store error: {source}")]
    Store { store: String, source: StoreError },

    #[error("Dirty set did not converge after {passes} passes ({pending} ids still pending)")]
    NotConverged { passes: u32, pending: u64 },

    #[error(transparent)]
    Transition(#[from] CoreError),
}

enum ValidationStage {
    /// Re-migrating dirty ids. Within one pass each id is processed at most
    /// once; ids marked again are left for the next pass.
    Draining {
        pass: u32,
        remaining: u64,
        seen: HashSet<RecordKey>,
    },
    Checking,
}

impl ValidationStage {
    fn fresh() -> Self {
        Self::Draining {
            pass: 0,
            remaining: 0,
            seen: HashSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable client of the migration worker.
#[derive(Clone)]
pub struct MigrationHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<MigrationStatus>,
    tracker: Arc<DirtySetTracker>,
    writer: DualWriter,
}

impl MigrationHandle {
    /// Latest status snapshot with a live dirty-set count.
    pub fn status(&self) -> MigrationStatus {
        let mut status = self.status.borrow().clone();
        status.dirty_id_count = self.tracker.count();
        status
    }

    pub fn subscribe_status(&self) -> watch::Receiver<MigrationStatus> {
        self.status.clone()
    }

    /// Application read/write path that follows the migration's routing.
    pub fn dual_writer(&self) -> &DualWriter {
        &self.writer
    }

    pub fn tracker(&self) -> &Arc<DirtySetTracker> {
        &self.tracker
    }

    pub async fn check_prerequisites(&self) -> Result<PrerequisitesResult, CoreError> {
        self.request(|reply| Command::CheckPrerequisites { reply }).await
    }

    /// Start a migration. `expected_total` overrides the counted total.
    pub async fn start(&self, expected_total: Option<u64>) -> Result<MigrationStatus, CoreError> {
        self.request(|reply| Command::Start {
            expected_total,
            reply,
        })
        .await
    }

    pub async fn pause(&self) -> Result<MigrationStatus, CoreError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<MigrationStatus, CoreError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    pub async fn cancel(&self) -> Result<MigrationStatus, CoreError> {
        self.request(|reply| Command::Cancel { reply }).await
    }

    pub async fn record_cleanup(
        &self,
        update: CleanupUpdate,
    ) -> Result<MigrationStatus, CoreError> {
        self.request(|reply| Command::RecordCleanup { update, reply })
            .await
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }
}

fn worker_gone() -> CoreError {
    CoreError::Internal("Migration worker is not running".into())
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: MigrationConfig,
    legacy: Arc<dyn RecordStore>,
    target: Arc<dyn RecordStore>,
    events: Arc<EventBus>,

    machine: MigrationStateMachine,
    status: MigrationStatus,
    status_tx: watch::Sender<MigrationStatus>,
    prerequisites_ok: bool,
    expected_total: Option<u64>,

    checker: PrerequisiteChecker,
    backfill: BackfillEngine,
    validator: Validator,
    control: Arc<MirrorControl>,
    tracker: Arc<DirtySetTracker>,
    skipped: Arc<SkippedRecords>,

    cursor: Option<RecordId>,
    rate: RateWindow,
    stage: ValidationStage,
}

impl Orchestrator {
    /// Spawn the worker. It runs until `cancel` fires or every handle is
    /// dropped.
    pub fn spawn(
        deps: MigrationDeps,
        config: MigrationConfig,
        cancel: CancellationToken,
    ) -> (MigrationHandle, JoinHandle<()>) {
        let control = Arc::new(MirrorControl::new(config.mirror_max_concurrent));
        let tracker = Arc::new(DirtySetTracker::new());
        let skipped = Arc::new(SkippedRecords::default());

        let writer = DualWriter::new(
            Arc::clone(&deps.legacy),
            Arc::clone(&deps.target),
            Arc::clone(&deps.transform),
            Arc::clone(&control),
            Arc::clone(&tracker),
            Arc::clone(&skipped),
        );
        let checker = PrerequisiteChecker::new(
            Arc::clone(&deps.legacy),
            Arc::clone(&deps.target),
            deps.host,
            config.data_dir.clone(),
            config.min_disk_space_bytes,
        );
        let backfill = BackfillEngine::new(
            Arc::clone(&deps.legacy),
            Arc::clone(&deps.target),
            Arc::clone(&deps.transform),
            Arc::clone(&control),
            Arc::clone(&skipped),
            config.batch_size,
        );
        let validator = Validator::new(
            Arc::clone(&deps.legacy),
            Arc::clone(&deps.target),
            deps.transform,
            Arc::clone(&skipped),
            config.validation_sample_size,
        );

        let status = MigrationStatus::default();
        let (status_tx, status_rx) = watch::channel(status.clone());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let worker = Self {
            config,
            legacy: deps.legacy,
            target: deps.target,
            events: deps.events,
            machine: MigrationStateMachine::new(),
            status,
            status_tx,
            prerequisites_ok: true,
            expected_total: None,
            checker,
            backfill,
            validator,
            control,
            tracker: Arc::clone(&tracker),
            skipped,
            cursor: None,
            rate: RateWindow::default(),
            stage: ValidationStage::fresh(),
        };

        let join = tokio::spawn(worker.run(command_rx, cancel));
        let handle = MigrationHandle {
            commands: command_tx,
            status: status_rx,
            tracker,
            writer,
        };
        (handle, join)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        tracing::info!("Migration worker started");

        loop {
            let runnable = self.machine.state().is_active();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Migration worker stopping");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        tracing::info!("All migration handles dropped, worker stopping");
                        break;
                    }
                },
                _ = tokio::time::sleep(self.config.batch_pause), if runnable => self.step().await,
            }
        }
    }

    // -- commands --

    async fn handle(&mut self, command: Command) {
        match command {
            Command::CheckPrerequisites { reply } => {
                let state = self.machine.state();
                let result = self.checker.run(state).await;
                // `can_start` only reflects checks measured while idle.
                if state == MigrationState::Idle {
                    self.prerequisites_ok = result.can_start_migration;
                    self.publish_status();
                }
                let _ = reply.send(Ok(result));
            }
            Command::Start {
                expected_total,
                reply,
            } => {
                let result = self.start(expected_total).await;
                let _ = reply.send(result);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            Command::Cancel { reply } => {
                let result = self.cancel().await;
                let _ = reply.send(result);
            }
            Command::RecordCleanup { update, reply } => {
                self.status.cleanup_state = update.state;
                self.status.cleanup_error = update.error;
                if update.space_reclaimed.is_some() {
                    self.status.cleanup_space_reclaimed = update.space_reclaimed;
                }
                self.publish_status();
                let _ = reply.send(Ok(self.status.clone()));
            }
        }
    }

    async fn start(&mut self, expected_total: Option<u64>) -> Result<MigrationStatus, CoreError> {
        let state = self.machine.state();
        if state.is_active() || state == MigrationState::Paused {
            return Ok(self.status.clone());
        }
        self.machine.next_state(Transition::Start)?;

        let prerequisites = self.checker.run(state).await;
        self.prerequisites_ok = prerequisites.can_start_migration;
        if !prerequisites.can_start_migration {
            self.publish_status();
            return Err(CoreError::PrerequisitesFailed {
                check_ids: prerequisites.failed_check_ids(),
            });
        }

        self.status.reset_progress();
        self.expected_total = expected_total;
        if let Some(total) = expected_total {
            self.status.set_total(total);
        }
        self.status.started_at = Some(chrono::Utc::now());
        self.rate.reset();
        self.cursor = None;
        self.stage = ValidationStage::fresh();

        self.transition(Transition::Start)?;
        self.emit(EVENT_MIGRATION_STARTED, json!({ "expected_total": expected_total }));
        Ok(self.status.clone())
    }

    fn pause(&mut self) -> Result<MigrationStatus, CoreError> {
        if self.machine.state() == MigrationState::Paused {
            return Ok(self.status.clone());
        }
        let from = self.machine.state();
        self.transition(Transition::Pause)?;
        self.emit(EVENT_MIGRATION_PAUSED, json!({ "paused_from": from }));
        Ok(self.status.clone())
    }

    fn resume(&mut self) -> Result<MigrationStatus, CoreError> {
        if self.machine.state().is_active() {
            return Ok(self.status.clone());
        }
        let to = self.transition(Transition::Resume)?;
        if to == MigrationState::Validating {
            self.stage = ValidationStage::fresh();
        }
        self.emit(EVENT_MIGRATION_RESUMED, json!({ "state": to }));
        Ok(self.status.clone())
    }

    /// Roll back to idle: stop mirroring and discard everything copied.
    async fn cancel(&mut self) -> Result<MigrationStatus, CoreError> {
        let from = self.machine.state();
        if from == MigrationState::Idle {
            return Ok(self.status.clone());
        }
        self.machine.next_state(Transition::Cancel)?;

        let control = Arc::clone(&self.control);
        {
            let _gate = control.freeze().await;
            control.quiesce().await;
            for collection in Collection::ALL {
                self.target.truncate(collection).await.map_err(|e| {
                    CoreError::Internal(format!("Failed to discard migrated {collection}: {e}"))
                })?;
            }
            control.set_mode(WriteMode::Off);
        }
        control.reset_cursors();
        let discarded = self.tracker.clear();
        self.skipped.clear();
        self.cursor = None;
        self.rate.reset();
        self.stage = ValidationStage::fresh();

        self.status.reset_progress();
        self.prerequisites_ok = true;
        self.transition(Transition::Cancel)?;
        tracing::info!(from = %from, discarded_dirty_ids = discarded, "Migration cancelled");
        self.emit(EVENT_MIGRATION_CANCELLED, json!({ "from": from }));
        Ok(self.status.clone())
    }

    // -- phases --

    async fn step(&mut self) {
        let result = match self.machine.state() {
            MigrationState::Initializing => self.initialize().await,
            MigrationState::DualWrite => self.begin_baseline(),
            MigrationState::Migrating | MigrationState::MigratingPredictions => {
                self.backfill_step().await
            }
            MigrationState::Validating => {
                if matches!(self.stage, ValidationStage::Checking) {
                    self.check().await
                } else {
                    self.drain_step().await
                }
            }
            MigrationState::Cutover => self.cutover().await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.fail(e.to_string()).await;
        }
    }

    async fn initialize(&mut self) -> Result<(), StepError> {
        for collection in Collection::ALL {
            let removed = self
                .target
                .truncate(collection)
                .await
                .map_err(|e| store_step(&*self.target, e))?;
            if removed > 0 {
                tracing::info!(
                    collection = %collection,
                    removed,
                    "Cleared existing new-store records"
                );
            }
        }
        self.tracker.clear();
        self.skipped.clear();
        self.control.reset_cursors();
        self.cursor = None;

        let mut counted = 0;
        for collection in Collection::ALL {
            counted += self
                .legacy
                .count(collection)
                .await
                .map_err(|e| store_step(&*self.legacy, e))?;
        }
        self.status.set_total(self.expected_total.unwrap_or(counted));

        {
            let _gate = self.control.freeze().await;
            self.control.set_mode(WriteMode::DualWrite);
        }
        tracing::info!(total = self.status.total_records, "Dual-write mirroring enabled");
        self.transition(Transition::MirroringEnabled)?;
        Ok(())
    }

    fn begin_baseline(&mut self) -> Result<(), StepError> {
        self.cursor = None;
        self.rate.reset();
        self.rate.record(Instant::now(), self.status.migrated_records);
        self.transition(Transition::BaselineStarted)?;
        self.emit_progress();
        Ok(())
    }

    async fn backfill_step(&mut self) -> Result<(), StepError> {
        let Some(collection) = self.machine.state().phase_collection() else {
            return Ok(());
        };

        let outcome = self.backfill.run_phase(collection, self.cursor).await?;
        self.cursor = outcome.cursor;

        if outcome.migrated > 0 || outcome.skipped > 0 {
            self.status.skipped_records += outcome.skipped;
            self.status
                .set_progress(self.status.migrated_records + outcome.migrated);
            self.update_rate();
            self.emit_progress();
        }

        if outcome.done {
            tracing::info!(
                collection = %collection,
                migrated = self.status.migrated_records,
                "Backfill phase complete"
            );
            self.cursor = None;
            let transition = match collection {
                Collection::Detections => Transition::DetectionsComplete,
                Collection::Predictions => {
                    self.stage = ValidationStage::fresh();
                    Transition::PredictionsComplete
                }
            };
            self.transition(transition)?;
        } else {
            self.publish_status();
        }
        Ok(())
    }

    /// One chunk of the current dirty-set drain pass.
    async fn drain_step(&mut self) -> Result<(), StepError> {
        let max_passes = self.config.dirty_drain_max_passes;
        let chunk = self.config.dirty_drain_batch as u64;
        let ValidationStage::Draining {
            pass,
            remaining,
            seen,
        } = &mut self.stage
        else {
            return Ok(());
        };

        if *remaining == 0 {
            let pending = self.tracker.count();
            if pending == 0 {
                tracing::info!(passes = *pass, "Dirty set drained");
                self.stage = ValidationStage::Checking;
                return Ok(());
            }
            if *pass + 1 >= max_passes {
                let last = *pass + 1;
                return self.final_drain_pass(last).await;
            }
            *pass += 1;
            *remaining = pending;
            seen.clear();
            tracing::debug!(pass = *pass, pending, "Dirty drain pass started");
        }

        let keys = self.tracker.drain((*remaining).min(chunk) as usize);
        *remaining = if keys.is_empty() {
            0
        } else {
            remaining.saturating_sub(keys.len() as u64)
        };
        let fresh = retain_unseen(&self.tracker, keys, seen);
        self.backfill.remigrate(&fresh).await?;
        self.publish_status();
        Ok(())
    }

    /// Last allowed pass, run with application writes held so the set can
    /// only shrink.
    async fn final_drain_pass(&mut self, pass: u32) -> Result<(), StepError> {
        let control = Arc::clone(&self.control);
        let _gate = control.freeze().await;
        control.quiesce().await;

        self.drain_pending().await?;
        let pending = self.tracker.count();
        if pending > 0 {
            return Err(StepError::NotConverged {
                passes: pass,
                pending,
            });
        }
        tracing::info!(passes = pass, "Dirty set drained with writes held");
        self.stage = ValidationStage::Checking;
        Ok(())
    }

    async fn check(&mut self) -> Result<(), StepError> {
        match self.validator.validate().await {
            Ok(_) => {}
            Err(e) if e.is_store_error() => return Err(e.into()),
            Err(e) => {
                // Mirror copies still in flight can look like a mismatch.
                // Settle them with writes held before deciding.
                tracing::warn!(error = %e, "Validation mismatch, re-checking with writes held");
                let control = Arc::clone(&self.control);
                let _gate = control.freeze().await;
                control.quiesce().await;
                self.drain_pending().await?;
                self.validator.validate().await?;
            }
        }
        self.transition(Transition::ValidationPassed)?;
        Ok(())
    }

    async fn cutover(&mut self) -> Result<(), StepError> {
        let control = Arc::clone(&self.control);
        {
            let _gate = control.freeze().await;
            control.quiesce().await;
            self.drain_pending().await?;
            let pending = self.tracker.count();
            if pending > 0 {
                return Err(StepError::NotConverged { passes: 1, pending });
            }
            control.set_mode(WriteMode::NewOnly);
        }

        self.status.is_v2_only_mode = true;
        self.status.completed_at = Some(chrono::Utc::now());
        self.status.estimated_remaining = None;
        self.status.estimated_remaining_secs = None;
        self.transition(Transition::CutoverComplete)?;
        self.emit(
            EVENT_MIGRATION_COMPLETED,
            json!({
                "migrated_records": self.status.migrated_records,
                "skipped_records": self.status.skipped_records,
            }),
        );
        Ok(())
    }

    async fn fail(&mut self, message: String) {
        {
            let _gate = self.control.freeze().await;
            self.control.set_mode(WriteMode::Off);
        }
        let from = self.machine.state();
        if let Err(e) = self.transition(Transition::Fail) {
            tracing::error!(error = %e, reason = %message, "Could not record migration failure");
            return;
        }
        tracing::error!(from = %from, reason = %message, "Migration failed");
        self.status.error_message = Some(message.clone());
        self.publish_status();
        self.emit(EVENT_MIGRATION_FAILED, json!({ "from": from, "error": message }));
    }

    // -- helpers --

    /// Re-migrate every id pending right now, each at most once.
    async fn drain_pending(&self) -> Result<(), StepError> {
        let mut remaining = self.tracker.count();
        let mut seen = HashSet::new();
        while remaining > 0 {
            let limit = remaining.min(self.config.dirty_drain_batch as u64) as usize;
            let keys = self.tracker.drain(limit);
            if keys.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(keys.len() as u64);
            let fresh = retain_unseen(&self.tracker, keys, &mut seen);
            self.backfill.remigrate(&fresh).await?;
        }
        Ok(())
    }

    fn transition(&mut self, transition: Transition) -> Result<MigrationState, CoreError> {
        let from = self.machine.state();
        let to = self.machine.apply(transition)?;
        self.status.error_message = None;
        self.publish_status();
        tracing::info!(from = %from, to = %to, "Migration state changed");
        self.emit(EVENT_MIGRATION_STATE_CHANGED, json!({ "from": from, "to": to }));
        Ok(to)
    }

    fn update_rate(&mut self) {
        self.rate.record(Instant::now(), self.status.migrated_records);
        self.status.records_per_second = self.rate.records_per_second();
        let remaining = self
            .status
            .total_records
            .saturating_sub(self.status.migrated_records);
        let eta = self.rate.estimate_remaining(remaining);
        self.status.estimated_remaining = eta.map(format_duration);
        self.status.estimated_remaining_secs = eta.map(|d| d.as_secs());
    }

    fn publish_status(&mut self) {
        self.status.apply_machine(&self.machine, self.prerequisites_ok);
        self.status.dirty_id_count = self.tracker.count();
        self.status_tx.send_replace(self.status.clone());
    }

    fn emit_progress(&self) {
        self.emit(
            EVENT_MIGRATION_PROGRESS,
            json!({
                "phase": self.status.current_phase,
                "migrated_records": self.status.migrated_records,
                "total_records": self.status.total_records,
                "progress_percent": self.status.progress_percent,
            }),
        );
    }

    fn emit(&self, event_type: &str, payload: serde_json::Value) {
        self.events
            .publish(MigrationEvent::new(event_type).with_payload(payload));
    }
}

/// Keep keys not yet processed in this pass; re-mark the rest for later.
fn retain_unseen(
    tracker: &DirtySetTracker,
    keys: Vec<RecordKey>,
    seen: &mut HashSet<RecordKey>,
) -> Vec<RecordKey> {
    keys.into_iter()
        .filter(|key| {
            if seen.insert(*key) {
                true
            } else {
                tracker.mark(*key);
                false
            }
        })
        .collect()
}

fn store_step(store: &dyn RecordStore, source: StoreError) -> StepError {
    StepError::Store {
        store: store.name().to_string(),
        source,
    }
}
