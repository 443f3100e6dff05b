//! Job notification envelope and event type constants.
//!
//! [`Notification`] is what watchers receive over a notification channel.
//! The `JOB_*` constants name the lifecycle events published on the
//! internal event bus.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus};
use crate::progress::ProgressSnapshot;
use crate::types::JobId;

/// Envelope `type` for progress notifications.
pub const MSG_TYPE_PROGRESS: &str = "progress";

/// Envelope `type` for status notifications.
pub const MSG_TYPE_STATUS: &str = "status";

/// A job was accepted and is waiting for a worker.
pub const JOB_SUBMITTED: &str = "job.submitted";

/// A worker picked the job up.
pub const JOB_STARTED: &str = "job.started";

/// A new progress snapshot was recorded.
pub const JOB_PROGRESS: &str = "job.progress";

/// The pipeline finished successfully.
pub const JOB_COMPLETED: &str = "job.completed";

/// The pipeline failed.
pub const JOB_FAILED: &str = "job.failed";

/// The job was cancelled by a caller or by shutdown.
pub const JOB_CANCELLED: &str = "job.cancelled";

/// Lifecycle event name for a status change.
pub fn status_event_type(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => JOB_SUBMITTED,
        JobStatus::Running => JOB_STARTED,
        JobStatus::Completed => JOB_COMPLETED,
        JobStatus::Failed => JOB_FAILED,
        JobStatus::Cancelled => JOB_CANCELLED,
    }
}

/// Payload of a status notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Message pushed to every watcher of a job.
///
/// Serialized as `{"type": "progress"|"status", "jobId": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    Progress {
        #[serde(rename = "jobId")]
        job_id: JobId,
        data: ProgressSnapshot,
    },
    Status {
        #[serde(rename = "jobId")]
        job_id: JobId,
        data: StatusUpdate,
    },
}

impl Notification {
    pub fn progress(job_id: JobId, snapshot: ProgressSnapshot) -> Self {
        Notification::Progress {
            job_id,
            data: snapshot,
        }
    }

    /// Status notification reflecting the job's current record.
    pub fn status_of(job: &Job) -> Self {
        Notification::Status {
            job_id: job.id,
            data: StatusUpdate {
                status: job.status,
                result: job.result.clone(),
                error: job.error.clone(),
            },
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            Notification::Progress { job_id, .. } | Notification::Status { job_id, .. } => *job_id,
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Notification::Progress { .. } => MSG_TYPE_PROGRESS,
            Notification::Status { .. } => MSG_TYPE_STATUS,
        }
    }

    /// Whether this is the last notification a job will ever produce.
    pub fn is_terminal(&self) -> bool {
        match self {
            Notification::Status { data, .. } => data.status.is_terminal(),
            Notification::Progress { .. } => false,
        }
    }
}
