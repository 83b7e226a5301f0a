//! Event log sink.
//!
//! [`EventLogger`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! writes each [`MigrationEvent`] as a structured `tracing` record. It is the
//! notification channel for start, pause, cancel, failure and completion.

use tokio::sync::broadcast;

use crate::bus::{MigrationEvent, EVENT_MIGRATION_PROGRESS};

/// Background service that logs every published event.
pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop until the bus is dropped.
    pub async fn run(mut receiver: broadcast::Receiver<MigrationEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => Self::log(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
    }

    fn log(event: &MigrationEvent) {
        let source = event.source_id.as_deref().unwrap_or("-");
        if event.is_failure() {
            tracing::error!(
                event_type = %event.event_type,
                source,
                payload = %event.payload,
                "Event"
            );
        } else if event.event_type == EVENT_MIGRATION_PROGRESS {
            tracing::debug!(event_type = %event.event_type, payload = %event.payload, "Event");
        } else {
            tracing::info!(
                event_type = %event.event_type,
                source,
                payload = %event.payload,
                "Event"
            );
        }
    }
}
