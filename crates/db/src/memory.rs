//! In-process job store.

use std::collections::HashMap;

use async_trait::async_trait;
use lpe_core::job::{Job, JobListQuery, NewJob, StatusCounts};
use lpe_core::types::JobId;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{self, JobStore};

/// Non-durable [`JobStore`] backed by a `HashMap`.
///
/// Listing order matches the SQLite store: newest `created_at` first,
/// ties broken by most recent first insertion.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    next_seq: u64,
}

struct Entry {
    seq: u64,
    job: Job,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<Job, StoreError> {
        let job = Job::new(new);
        self.save(&job).await?;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.read().await.jobs.get(&id).map(|e| e.job.clone()))
    }

    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.jobs.get_mut(&job.id) {
            entry.job = job.clone();
        } else {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.jobs.insert(
                job.id,
                Entry {
                    seq,
                    job: job.clone(),
                },
            );
        }
        Ok(())
    }

    async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|e| query.status.map_or(true, |s| e.job.status == s))
            .collect();
        matching.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        let offset = usize::try_from(query.effective_offset()).unwrap_or(0);
        let limit = usize::try_from(query.effective_limit()).unwrap_or(0);
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|e| e.job.clone())
            .collect())
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|e| !e.job.is_terminal())
            .collect();
        matching.sort_by(|a, b| a.job.created_at.cmp(&b.job.created_at).then(a.seq.cmp(&b.seq)));
        Ok(matching.into_iter().map(|e| e.job.clone()).collect())
    }

    async fn delete_older_than(
        &self,
        age: chrono::Duration,
        terminal_only: bool,
    ) -> Result<u64, StoreError> {
        let cutoff = store::cutoff_for(age)?;
        let mut inner = self.inner.write().await;
        let before = inner.jobs.len();
        inner
            .jobs
            .retain(|_, e| !(e.job.created_at < cutoff && (!terminal_only || e.job.is_terminal())));
        Ok((before - inner.jobs.len()) as u64)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let inner = self.inner.read().await;
        let mut counts = StatusCounts::default();
        for entry in inner.jobs.values() {
            counts.add(entry.job.status, 1);
        }
        Ok(counts)
    }
}
