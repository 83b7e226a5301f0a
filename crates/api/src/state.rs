use std::sync::Arc;
use std::time::Duration;

use cutover_db::RecordStore;
use cutover_events::EventBus;
use cutover_migration::jobs::{BackupJobManager, JobRegistry, LegacyCleanupCoordinator};
use cutover_migration::prerequisites::HostResources;
use cutover_migration::{
    MigrationConfig, MigrationDeps, MigrationHandle, Orchestrator, RecordTransform,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Client of the migration worker.
    pub migration: MigrationHandle,
    /// Backup export jobs.
    pub backups: BackupJobManager,
    /// Legacy store deletion after cutover.
    pub cleanup: LegacyCleanupCoordinator,
    /// Centralized event bus for migration, backup and cleanup events.
    pub event_bus: Arc<EventBus>,
    /// The store currently being migrated away from.
    pub legacy: Arc<dyn RecordStore>,
    /// The store being migrated to.
    pub target: Arc<dyn RecordStore>,
}

/// Everything [`AppState::build`] needs besides the server config.
pub struct StateDeps {
    pub legacy: Arc<dyn RecordStore>,
    pub target: Arc<dyn RecordStore>,
    pub transform: Arc<dyn RecordTransform>,
    pub host: Arc<dyn HostResources>,
    pub event_bus: Arc<EventBus>,
    pub migration_config: MigrationConfig,
}

impl AppState {
    /// Spawn the migration worker and wire the job managers around it.
    ///
    /// The returned handle completes once `cancel` fires and the worker
    /// has stopped.
    pub fn build(
        config: ServerConfig,
        deps: StateDeps,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (migration, worker) = Orchestrator::spawn(
            MigrationDeps {
                legacy: Arc::clone(&deps.legacy),
                target: Arc::clone(&deps.target),
                transform: deps.transform,
                host: Arc::clone(&deps.host),
                events: Arc::clone(&deps.event_bus),
            },
            deps.migration_config,
            cancel,
        );

        let registry = Arc::new(JobRegistry::new(Duration::from_secs(config.job_retention_secs)));
        let backups = BackupJobManager::new(
            Arc::clone(&registry),
            Arc::clone(&deps.legacy),
            Arc::clone(&deps.target),
            deps.host,
            Arc::clone(&deps.event_bus),
            config.backup_dir.clone(),
        );
        let cleanup = LegacyCleanupCoordinator::new(
            registry,
            Arc::clone(&deps.legacy),
            Arc::clone(&deps.target),
            migration.clone(),
            Arc::clone(&deps.event_bus),
        );

        let state = Self {
            config: Arc::new(config),
            migration,
            backups,
            cleanup,
            event_bus: deps.event_bus,
            legacy: deps.legacy,
            target: deps.target,
        };
        (state, worker)
    }
}
