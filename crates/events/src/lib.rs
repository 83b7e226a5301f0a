//! Cutover event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`MigrationEvent`]: the event envelope for migration, backup and
//!   cleanup milestones.
//! - [`EventLogger`]: background service that turns every event into a
//!   structured log line.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, MigrationEvent};
pub use logger::EventLogger;
