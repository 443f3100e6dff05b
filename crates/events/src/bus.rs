//! In-process lifecycle event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] carries [`JobEvent`]s to any number of independent
//! consumers (the audit journal, tests). It is shared via `Arc<EventBus>`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use lpe_core::job::JobKind;
use lpe_core::types::{self, JobId, Timestamp};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A lifecycle event of the job engine.
///
/// Constructed via [`JobEvent::new`] and enriched with
/// [`with_job`](JobEvent::with_job) and [`with_payload`](JobEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Dot-separated event name, e.g. `"job.completed"`.
    pub event_type: String,

    pub job_id: Option<JobId>,

    pub job_kind: Option<JobKind>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: Timestamp,
}

impl JobEvent {
    /// Create an event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            job_id: None,
            job_kind: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: types::now(),
        }
    }

    /// Attach the job the event is about.
    pub fn with_job(mut self, job_id: JobId, kind: JobKind) -> Self {
        self.job_id = Some(job_id);
        self.job_kind = Some(kind);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
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
/// use lpe_events::bus::{EventBus, JobEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobEvent::new("job.submitted"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no active subscribers the event is dropped.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
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
