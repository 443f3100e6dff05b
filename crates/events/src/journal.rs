//! Audit trail of lifecycle events.
//!
//! [`EventJournal`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! writes every received [`JobEvent`] as a structured `tracing` record under
//! the `lpe::journal` target. It runs as a long-lived background task and
//! exits when the bus is dropped.

use tokio::sync::broadcast;

use crate::bus::JobEvent;

/// Background service that records lifecycle events.
pub struct EventJournal;

impl EventJournal {
    /// Run the journal loop until the channel closes. Returns the number of
    /// events recorded.
    pub async fn run(mut receiver: broadcast::Receiver<JobEvent>) -> u64 {
        let mut recorded = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    Self::record(&event);
                    recorded += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        target: "lpe::journal",
                        skipped = n,
                        "Event journal lagged, some events were not recorded"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!(target: "lpe::journal", recorded, "Event bus closed, journal shutting down");
                    break;
                }
            }
        }
        recorded
    }

    fn record(event: &JobEvent) {
        let job_id = event.job_id.map(|id| id.to_string()).unwrap_or_default();
        let kind = event.job_kind.map(|k| k.as_str()).unwrap_or_default();
        tracing::info!(
            target: "lpe::journal",
            event_type = %event.event_type,
            job_id = %job_id,
            kind,
            at = %event.timestamp,
            payload = %event.payload,
            "Job event"
        );
    }
}
