//! The `JobStore` trait.

use async_trait::async_trait;
use lpe_core::job::{Job, JobListQuery, JobStatus, NewJob, StatusCounts};
use lpe_core::types::{self, JobId, Timestamp};

use crate::error::StoreError;

/// Durable keyed storage for job records.
///
/// Implementations are internally synchronized. `save` writes the whole
/// record at once: a reader never observes a half-applied update.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Allocate a new pending job and persist it.
    async fn create(&self, new: NewJob) -> Result<Job, StoreError>;

    /// Fetch a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Insert or fully replace a job record. Idempotent.
    async fn save(&self, job: &Job) -> Result<(), StoreError>;

    /// List jobs newest-created first, applying the query's filter and paging.
    async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, StoreError>;

    /// All pending and running jobs, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<Job>, StoreError>;

    /// Delete jobs created more than `age` ago. With `terminal_only`, only
    /// completed, failed and cancelled jobs are eligible. Returns the
    /// number of deleted records.
    async fn delete_older_than(
        &self,
        age: chrono::Duration,
        terminal_only: bool,
    ) -> Result<u64, StoreError>;

    /// Number of stored jobs per status.
    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;
}

/// Statuses that are eligible for deletion under `terminal_only`.
pub(crate) const TERMINAL_STATUSES: [JobStatus; 3] = [
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

/// The creation time before which records are older than `age`.
pub(crate) fn cutoff_for(age: chrono::Duration) -> Result<Timestamp, StoreError> {
    types::now()
        .checked_sub_signed(age)
        .ok_or(StoreError::AgeOutOfRange(age))
}
