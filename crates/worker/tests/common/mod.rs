#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lpe_core::error::CoreError;
use lpe_core::job::{Job, JobListQuery, JobStatus, NewJob, StatusCounts};
use lpe_core::types::JobId;
use lpe_db::{JobStore, MemoryJobStore, StoreError};
use lpe_events::{EventBus, NotificationHub};
use lpe_pipeline::{step_fn, Pipeline, PipelineFactory, StepContext, StepExecutor, StepFailure};
use lpe_worker::{JobManager, WorkerConfig};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Everything a manager test needs to poke at.
pub struct Harness {
    pub manager: Arc<JobManager>,
    pub store: Arc<dyn JobStore>,
    pub hub: Arc<NotificationHub>,
    pub bus: Arc<EventBus>,
}

/// Worker settings with fast terminal save retries.
pub fn config(workers: usize) -> WorkerConfig {
    WorkerConfig {
        max_concurrent_jobs: workers,
        terminal_save_backoff: Duration::from_millis(1),
        ..WorkerConfig::default()
    }
}

pub fn harness(pipelines: impl PipelineFactory + 'static, config: WorkerConfig) -> Harness {
    harness_with_store(Arc::new(MemoryJobStore::new()), pipelines, config)
}

pub fn harness_with_store(
    store: Arc<dyn JobStore>,
    pipelines: impl PipelineFactory + 'static,
    config: WorkerConfig,
) -> Harness {
    let hub = Arc::new(NotificationHub::new());
    let bus = Arc::new(EventBus::default());
    let manager = JobManager::new(
        Arc::clone(&store),
        Arc::clone(&hub),
        Arc::clone(&bus),
        Arc::new(pipelines),
        config,
    );
    Harness {
        manager,
        store,
        hub,
        bus,
    }
}

/// Factory producing the same pipeline for every job.
pub fn fixed(pipeline: Pipeline) -> impl PipelineFactory {
    move |_job: &Job| -> Result<Pipeline, CoreError> { Ok(pipeline.clone()) }
}

/// Poll until job `id` reaches `status`. Panics after five seconds.
pub async fn wait_for_status(manager: &JobManager, id: JobId, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = manager.get(id).await.unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} stuck in {} waiting for {status}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

pub fn echo() -> Arc<dyn StepExecutor> {
    step_fn(|_ctx, input: Value| async move { Ok::<_, StepFailure>(input) })
}

pub fn failing(message: &'static str) -> Arc<dyn StepExecutor> {
    step_fn(move |_ctx, _input: Value| async move { Err::<Value, _>(StepFailure::new(message)) })
}

/// Passes its input through and counts invocations.
pub fn counting(calls: Arc<AtomicU32>) -> Arc<dyn StepExecutor> {
    step_fn(move |_ctx, input: Value| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, StepFailure>(input)
        }
    })
}

/// Blocks until `release` fires (then echoes) or the job is cancelled.
pub fn gated(release: CancellationToken) -> Arc<dyn StepExecutor> {
    step_fn(move |ctx: StepContext, input: Value| {
        let release = release.clone();
        async move {
            tokio::select! {
                () = release.cancelled() => Ok(input),
                () = ctx.cancel.cancelled() => Err(StepFailure::new("aborted")),
            }
        }
    })
}

pub struct Panics;

#[async_trait]
impl StepExecutor for Panics {
    async fn execute(&self, _ctx: &StepContext, _input: Value) -> Result<Value, StepFailure> {
        panic!("kaboom")
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Memory store whose saves of terminal states fail a fixed number of times.
pub struct FlakyStore {
    inner: MemoryJobStore,
    terminal_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(terminal_failures: u32) -> Self {
        Self {
            inner: MemoryJobStore::new(),
            terminal_failures: AtomicU32::new(terminal_failures),
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create(&self, new: NewJob) -> Result<Job, StoreError> {
        self.inner.create(new).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.inner.get(id).await
    }

    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        if job.is_terminal() {
            let remaining = self
                .terminal_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if remaining.is_ok() {
                return Err(StoreError::Corrupt {
                    id: job.id.to_string(),
                    reason: "disk full".into(),
                });
            }
        }
        self.inner.save(job).await
    }

    async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, StoreError> {
        self.inner.list(query).await
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.list_unfinished().await
    }

    async fn delete_older_than(
        &self,
        age: chrono::Duration,
        terminal_only: bool,
    ) -> Result<u64, StoreError> {
        self.inner.delete_older_than(age, terminal_only).await
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        self.inner.count_by_status().await
    }
}
