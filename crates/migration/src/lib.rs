//! Migration runtime: dual-write mirroring, backfill, validation, cutover,
//! and the backup and legacy-cleanup job workers.
//!
//! The [`orchestrator`] owns all mutable migration state on a single
//! background task. Everything else talks to it through a
//! [`MigrationHandle`](orchestrator::MigrationHandle).

pub mod backfill;
pub mod config;
pub mod dirty_set;
pub mod jobs;
pub mod mirror;
pub mod orchestrator;
pub mod prerequisites;
pub mod transform;
pub mod validator;

pub use config::MigrationConfig;
pub use dirty_set::DirtySetTracker;
pub use mirror::DualWriter;
pub use orchestrator::{MigrationDeps, MigrationHandle, Orchestrator};
pub use transform::{IdentityTransform, RecordTransform};
