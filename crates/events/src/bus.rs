//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the central publish/subscribe hub for [`MigrationEvent`]s.
//! It is designed to be shared via `Arc<EventBus>` across the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

pub const EVENT_MIGRATION_STARTED: &str = "migration.started";
pub const EVENT_MIGRATION_STATE_CHANGED: &str = "migration.state_changed";
pub const EVENT_MIGRATION_PROGRESS: &str = "migration.progress";
pub const EVENT_MIGRATION_PAUSED: &str = "migration.paused";
pub const EVENT_MIGRATION_RESUMED: &str = "migration.resumed";
pub const EVENT_MIGRATION_CANCELLED: &str = "migration.cancelled";
pub const EVENT_MIGRATION_FAILED: &str = "migration.failed";
pub const EVENT_MIGRATION_COMPLETED: &str = "migration.completed";

pub const EVENT_BACKUP_STARTED: &str = "backup.started";
pub const EVENT_BACKUP_COMPLETED: &str = "backup.completed";
pub const EVENT_BACKUP_FAILED: &str = "backup.failed";

pub const EVENT_CLEANUP_STARTED: &str = "cleanup.started";
pub const EVENT_CLEANUP_COMPLETED: &str = "cleanup.completed";
pub const EVENT_CLEANUP_FAILED: &str = "cleanup.failed";

// ---------------------------------------------------------------------------
// MigrationEvent
// ---------------------------------------------------------------------------

/// Something that happened during a migration, backup or cleanup.
///
/// Constructed via [`MigrationEvent::new`] and enriched with
/// [`with_source`](MigrationEvent::with_source) and
/// [`with_payload`](MigrationEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationEvent {
    /// Dot-separated event name, e.g. `"migration.progress"`.
    pub event_type: String,

    /// Optional source kind (e.g. `"backup_job"`).
    pub source_type: Option<String>,

    /// Optional source id (e.g. the job id).
    pub source_id: Option<String>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl MigrationEvent {
    /// Create a new event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source_type: None,
            source_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach a source entity to the event.
    pub fn with_source(
        mut self,
        source_type: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        self.source_type = Some(source_type.into());
        self.source_id = Some(source_id.into());
        self
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Whether the event reports a failure.
    pub fn is_failure(&self) -> bool {
        self.event_type.ends_with(".failed")
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use cutover_events::bus::{EventBus, MigrationEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(MigrationEvent::new("migration.started"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<MigrationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: MigrationEvent) {
        // A send error only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(
            MigrationEvent::new(EVENT_BACKUP_STARTED)
                .with_source("backup_job", "backup-legacy-1")
                .with_payload(serde_json::json!({"store": "legacy"})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, EVENT_BACKUP_STARTED);
        assert_eq!(received.source_type.as_deref(), Some("backup_job"));
        assert_eq!(received.source_id.as_deref(), Some("backup-legacy-1"));
        assert_eq!(received.payload["store"], "legacy");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(MigrationEvent::new(EVENT_MIGRATION_PROGRESS));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.event_type, EVENT_MIGRATION_PROGRESS);
        assert_eq!(e2.event_type, EVENT_MIGRATION_PROGRESS);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(MigrationEvent::new("orphan.event"));
    }

    #[test]
    fn failure_events_are_recognised() {
        assert!(MigrationEvent::new(EVENT_MIGRATION_FAILED).is_failure());
        assert!(!MigrationEvent::new(EVENT_MIGRATION_COMPLETED).is_failure());
    }
}
