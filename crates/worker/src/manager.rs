//! Job lifecycle orchestration.
//!
//! [`JobManager`] is the only component that mutates jobs. Jobs that are
//! not yet terminal live in an in-memory cache of [`JobSlot`]s, each
//! guarding its record with an async mutex. Every operation on a job takes
//! that mutex and holds it across mutate, save and broadcast, so the
//! persisted and broadcast sequences of one job are totally ordered even
//! when a caller's `cancel` races the worker.
//!
//! Terminal jobs are evicted from the cache once their final state has
//! been persisted; reads then fall through to the store.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use lpe_core::error::CoreError;
use lpe_core::job::{Job, JobKind, JobListQuery, JobStatus, NewJob, StatusCounts};
use lpe_core::job_events::{self, Notification};
use lpe_core::progress::ProgressSnapshot;
use lpe_core::step::PipelineStep;
use lpe_core::types::{self, JobId};
use lpe_db::JobStore;
use lpe_events::{EventBus, JobEvent, NotificationHub};
use lpe_pipeline::{
    Pipeline, PipelineError, PipelineFactory, PipelineObserver, PipelineOutput,
};

use crate::config::WorkerConfig;
use crate::pool::{QueueTicket, WorkerPool};

/// Error message recorded on jobs found running at startup.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A job that has not reached a terminal state yet.
struct JobSlot {
    job: Mutex<Job>,
    pipeline: Pipeline,
    cancel: CancellationToken,
}

enum Lookup {
    Active(Arc<JobSlot>),
    Inactive(Job),
}

/// Snapshot of engine load.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub counts: StatusCounts,
    /// Jobs holding a worker permit.
    pub active: usize,
    /// Jobs waiting for a worker permit.
    pub queued: usize,
    pub max_concurrent: usize,
}

/// What [`JobManager::recover`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Jobs that were running when the process stopped, now failed.
    pub failed: usize,
    /// Pending jobs put back on the worker pool.
    pub rescheduled: usize,
}

/// Orchestrates job creation, execution and state transitions.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    hub: Arc<NotificationHub>,
    bus: Arc<EventBus>,
    pipelines: Arc<dyn PipelineFactory>,
    pool: WorkerPool,
    config: WorkerConfig,
    active: RwLock<HashMap<JobId, Arc<JobSlot>>>,
    accepting: AtomicBool,
    shutdown: CancellationToken,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        hub: Arc<NotificationHub>,
        bus: Arc<EventBus>,
        pipelines: Arc<dyn PipelineFactory>,
        config: WorkerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            hub,
            bus,
            pipelines,
            pool: WorkerPool::new(config.max_concurrent_jobs, config.max_queued_jobs),
            config,
            active: RwLock::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Create a pending job and schedule it. Returns without waiting for
    /// execution.
    pub async fn submit(
        self: &Arc<Self>,
        kind: JobKind,
        title: impl Into<String>,
        description: impl Into<String>,
        input: serde_json::Value,
    ) -> Result<JobId, CoreError> {
        self.enqueue(NewJob::new(kind, title, description, input))
            .await
    }

    /// Create and schedule a job from a prepared [`NewJob`].
    ///
    /// Fails with `Validation` if no pipeline can be built for the input,
    /// `CapacityExceeded` if the queue is full and `ShuttingDown` after
    /// [`shutdown`](Self::shutdown).
    pub async fn enqueue(self: &Arc<Self>, new: NewJob) -> Result<JobId, CoreError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(CoreError::ShuttingDown);
        }
        let pipeline = self.pipelines.build(&Job::new(new.clone()))?;
        let ticket = self.pool.try_reserve()?;

        let job = self.store.create(new).await?;
        let id = job.id;
        let kind = job.kind;
        let total_steps = pipeline.total_steps();

        let slot = self.insert_slot(job, pipeline).await;
        self.bus.publish(
            JobEvent::new(job_events::JOB_SUBMITTED)
                .with_job(id, kind)
                .with_payload(serde_json::json!({ "totalSteps": total_steps })),
        );
        tracing::info!(job_id = %id, kind = %kind, total_steps, "Job submitted");

        self.schedule(slot, ticket);
        Ok(id)
    }

    /// Submit a fresh copy of a failed or cancelled job.
    pub async fn resubmit(self: &Arc<Self>, id: JobId) -> Result<JobId, CoreError> {
        let original = self.get(id).await?;
        if !matches!(original.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(CoreError::InvalidTransition {
                id,
                from: original.status,
                to: JobStatus::Pending,
            });
        }
        let new_id = self.enqueue(NewJob::resubmission_of(&original)).await?;
        tracing::info!(job_id = %new_id, retry_of = %id, "Job resubmitted");
        Ok(new_id)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// `Pending -> Running`.
    pub async fn start(&self, id: JobId) -> Result<(), CoreError> {
        let slot = self.active_slot(id, JobStatus::Running).await?;
        let mut job = slot.job.lock().await;
        job.start(types::now())?;

        self.persist(&job).await;
        self.hub.broadcast(Notification::status_of(&job)).await;
        self.bus.publish(JobEvent::new(job_events::JOB_STARTED).with_job(id, job.kind));
        tracing::info!(job_id = %id, "Job started");
        Ok(())
    }

    /// Attach a new progress snapshot to a running job and broadcast it.
    ///
    /// A no-op (logged) when the job is not running. A snapshot whose
    /// percentage is lower than the current one is rejected.
    pub async fn update_progress(
        &self,
        id: JobId,
        current_step: &str,
        completed_steps: u32,
        total_steps: u32,
        detail: &str,
    ) -> Result<(), CoreError> {
        let slot = match self.lookup(id).await? {
            Lookup::Active(slot) => slot,
            Lookup::Inactive(job) => {
                tracing::debug!(job_id = %id, status = %job.status, "Ignoring progress for inactive job");
                return Ok(());
            }
        };
        let mut job = slot.job.lock().await;
        if job.status != JobStatus::Running {
            tracing::debug!(job_id = %id, status = %job.status, "Ignoring progress for job that is not running");
            return Ok(());
        }

        let snapshot = ProgressSnapshot::compute(current_step, completed_steps, total_steps, detail);
        job.set_progress(snapshot.clone())?;
        self.persist(&job).await;
        self.announce_progress(&job, snapshot).await;
        Ok(())
    }

    /// Record a completed pipeline step and the progress it implies.
    async fn step_completed(&self, id: JobId, step: PipelineStep, total_steps: u32) -> Result<(), CoreError> {
        let slot = match self.lookup(id).await? {
            Lookup::Active(slot) => slot,
            Lookup::Inactive(_) => return Ok(()),
        };
        let mut job = slot.job.lock().await;
        if job.status != JobStatus::Running {
            return Ok(());
        }

        let snapshot = ProgressSnapshot::compute(
            step.name.as_str(),
            step.position + 1,
            total_steps,
            format!("Completed {} in {}ms", step.name, step.duration_ms),
        );
        job.set_progress(snapshot.clone())?;
        job.record_step(step)?;
        self.persist(&job).await;
        self.announce_progress(&job, snapshot).await;
        Ok(())
    }

    /// `Running -> Completed` with the final result.
    pub async fn complete(&self, id: JobId, result: serde_json::Value) -> Result<(), CoreError> {
        self.finish(id, JobStatus::Completed, |job| job.complete(result, types::now()))
            .await
    }

    /// `Running -> Failed` with an error message.
    pub async fn fail(&self, id: JobId, message: impl Into<String>) -> Result<(), CoreError> {
        let message = message.into();
        self.finish(id, JobStatus::Failed, |job| job.fail(message, types::now()))
            .await
    }

    /// `Pending | Running -> Cancelled`. Signals the job's worker, which
    /// stops at its next step boundary.
    pub async fn cancel(&self, id: JobId) -> Result<(), CoreError> {
        self.finish(id, JobStatus::Cancelled, |job| job.cancel(types::now()))
            .await
    }

    /// Apply a terminal transition, persist it (with retries), broadcast it,
    /// and release the job's cache slot.
    async fn finish(
        &self,
        id: JobId,
        target: JobStatus,
        transition: impl FnOnce(&mut Job) -> Result<(), CoreError>,
    ) -> Result<(), CoreError> {
        let slot = self.active_slot(id, target).await?;
        let persisted = {
            let mut job = slot.job.lock().await;
            transition(&mut job)?;
            slot.cancel.cancel();

            let persisted = self.persist_terminal(&job).await;
            self.hub.broadcast(Notification::status_of(&job)).await;
            self.bus.publish(
                JobEvent::new(job_events::status_event_type(job.status))
                    .with_job(id, job.kind)
                    .with_payload(serde_json::json!({
                        "error": job.error,
                        "steps": job.steps.len(),
                    })),
            );
            match job.status {
                JobStatus::Failed => {
                    tracing::warn!(job_id = %id, error = job.error.as_deref().unwrap_or(""), "Job failed")
                }
                status => tracing::info!(job_id = %id, status = %status, "Job finished"),
            }
            persisted
        };

        if persisted {
            self.active.write().await.remove(&id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Fetch a job, preferring the live cached record.
    pub async fn get(&self, id: JobId) -> Result<Job, CoreError> {
        match self.lookup(id).await? {
            Lookup::Active(slot) => Ok(slot.job.lock().await.clone()),
            Lookup::Inactive(job) => Ok(job),
        }
    }

    /// List jobs from the store, substituting live cached records. The
    /// status filter is applied again to the live records, so a page can
    /// come back shorter than the limit while a job is changing state.
    pub async fn list(&self, query: &JobListQuery) -> Result<Vec<Job>, CoreError> {
        let mut jobs = self.store.list(query).await?;
        let cached: Vec<(usize, Arc<JobSlot>)> = {
            let active = self.active.read().await;
            jobs.iter()
                .enumerate()
                .filter_map(|(i, job)| active.get(&job.id).map(|slot| (i, Arc::clone(slot))))
                .collect()
        };
        for (i, slot) in cached {
            jobs[i] = slot.job.lock().await.clone();
        }
        if let Some(status) = query.status {
            jobs.retain(|job| job.status == status);
        }
        Ok(jobs)
    }

    pub async fn stats(&self) -> Result<JobStats, CoreError> {
        Ok(JobStats {
            counts: self.store.count_by_status().await?,
            active: self.pool.active(),
            queued: self.pool.queued(),
            max_concurrent: self.pool.size(),
        })
    }

    /// Number of jobs in the live cache.
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Reconcile jobs left unfinished by a previous process.
    ///
    /// Running jobs cannot be resumed and are failed through the normal
    /// terminal path. Pending jobs are rescheduled in creation order.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryReport, CoreError> {
        let mut report = RecoveryReport::default();

        for job in self.store.list_unfinished().await? {
            let id = job.id;
            if self.active.read().await.contains_key(&id) {
                continue;
            }
            match job.status {
                JobStatus::Running => {
                    self.insert_slot(job, Pipeline::new()).await;
                    self.fail(id, INTERRUPTED_BY_RESTART).await?;
                    report.failed += 1;
                }
                JobStatus::Pending => match self.pipelines.build(&job) {
                    Ok(pipeline) => {
                        let ticket = self.pool.reserve();
                        let slot = self.insert_slot(job, pipeline).await;
                        self.schedule(slot, ticket);
                        report.rescheduled += 1;
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %id, error = %e, "Cannot rebuild pipeline, cancelling job");
                        self.insert_slot(job, Pipeline::new()).await;
                        self.cancel(id).await?;
                    }
                },
                _ => {}
            }
        }

        tracing::info!(
            failed = report.failed,
            rescheduled = report.rescheduled,
            "Job recovery finished"
        );
        Ok(report)
    }

    /// Delete terminal jobs created more than `age` ago.
    pub async fn cleanup_expired(&self, age: chrono::Duration) -> Result<u64, CoreError> {
        Ok(self.store.delete_older_than(age, true).await?)
    }

    /// Stop accepting jobs, let running workers drain for up to `grace`,
    /// then cancel whatever is left and wait for it to wind down.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        self.pool.close();
        tracing::info!(
            active = self.pool.active(),
            queued = self.pool.queued(),
            grace_secs = grace.as_secs_f64(),
            "Job manager shutting down"
        );

        if tokio::time::timeout(grace, self.pool.wait()).await.is_ok() {
            tracing::info!("All workers drained");
            return;
        }

        tracing::warn!("Workers still running after grace period, cancelling");
        self.shutdown.cancel();
        if tokio::time::timeout(grace, self.pool.wait()).await.is_err() {
            tracing::error!("Workers did not stop after cancellation");
        }
    }

    // -----------------------------------------------------------------------
    // Worker
    // -----------------------------------------------------------------------

    fn schedule(self: &Arc<Self>, slot: Arc<JobSlot>, ticket: QueueTicket) {
        let manager = Arc::clone(self);
        self.pool.spawn(async move {
            manager.run_worker(slot, ticket).await;
        });
    }

    async fn run_worker(&self, slot: Arc<JobSlot>, ticket: QueueTicket) {
        let id = slot.job.lock().await.id;

        let Some(_permit) = self.pool.acquire(ticket, &slot.cancel).await else {
            tracing::debug!(job_id = %id, "Job left the queue before starting");
            return;
        };

        if let Err(e) = self.start(id).await {
            tracing::debug!(job_id = %id, error = %e, "Job not started");
            return;
        }

        let outcome = AssertUnwindSafe(self.execute(&slot, id)).catch_unwind().await;
        let finished = match outcome {
            Ok(Ok(output)) => self.complete(id, output.into_result()).await,
            Ok(Err(e)) if e.is_cancelled() => self.cancel_if_unfinished(id).await,
            Ok(Err(e)) => self.fail(id, e.to_string()).await,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(job_id = %id, panic = %message, "Worker panicked");
                self.fail(id, format!("Worker panicked: {message}")).await
            }
        };

        if let Err(e) = finished {
            // Typically a concurrent cancel won the race for the terminal state.
            tracing::debug!(job_id = %id, error = %e, "Worker outcome not applied");
        }
    }

    async fn execute(&self, slot: &JobSlot, id: JobId) -> Result<PipelineOutput, PipelineError> {
        let input = slot.job.lock().await.input.clone();
        let mut observer = ProgressObserver { manager: self, id };
        slot.pipeline
            .run(id, input, &slot.cancel, &mut observer)
            .await
    }

    async fn cancel_if_unfinished(&self, id: JobId) -> Result<(), CoreError> {
        let Lookup::Active(slot) = self.lookup(id).await? else {
            return Ok(());
        };
        let finished = slot.job.lock().await.is_terminal();
        if finished {
            return Ok(());
        }
        self.cancel(id).await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn insert_slot(&self, job: Job, pipeline: Pipeline) -> Arc<JobSlot> {
        let slot = Arc::new(JobSlot {
            cancel: self.shutdown.child_token(),
            job: Mutex::new(job.clone()),
            pipeline,
        });
        self.active.write().await.insert(job.id, Arc::clone(&slot));
        slot
    }

    async fn lookup(&self, id: JobId) -> Result<Lookup, CoreError> {
        if let Some(slot) = self.active.read().await.get(&id).cloned() {
            return Ok(Lookup::Active(slot));
        }
        match self.store.get(id).await? {
            Some(job) => Ok(Lookup::Inactive(job)),
            None => Err(CoreError::job_not_found(id)),
        }
    }

    /// The live slot of `id`, or the error an attempted transition to
    /// `target` on an inactive job produces.
    async fn active_slot(&self, id: JobId, target: JobStatus) -> Result<Arc<JobSlot>, CoreError> {
        match self.lookup(id).await? {
            Lookup::Active(slot) => Ok(slot),
            Lookup::Inactive(job) => Err(CoreError::InvalidTransition {
                id,
                from: job.status,
                to: target,
            }),
        }
    }

    async fn announce_progress(&self, job: &Job, snapshot: ProgressSnapshot) {
        self.bus.publish(
            JobEvent::new(job_events::JOB_PROGRESS)
                .with_job(job.id, job.kind)
                .with_payload(serde_json::json!({
                    "currentStep": snapshot.current_step,
                    "percentage": snapshot.percentage,
                })),
        );
        self.hub
            .broadcast(Notification::progress(job.id, snapshot))
            .await;
    }

    /// Save a non-terminal state. Failure is logged; the in-memory state
    /// still advances.
    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.save(job).await {
            tracing::warn!(job_id = %job.id, status = %job.status, error = %e, "Failed to persist job state");
        }
    }

    /// Save a terminal state with linear backoff. Returns whether it stuck.
    async fn persist_terminal(&self, job: &Job) -> bool {
        let attempts = self.config.terminal_save_attempts.max(1);
        for attempt in 1..=attempts {
            match self.store.save(job).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, attempt, attempts, error = %e, "Failed to persist terminal state");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.terminal_save_backoff * attempt).await;
                    }
                }
            }
        }
        tracing::error!(
            job_id = %job.id,
            status = %job.status,
            "Terminal state could not be persisted; store is inconsistent with memory"
        );
        false
    }
}

/// Feeds pipeline step boundaries back into the manager.
struct ProgressObserver<'a> {
    manager: &'a JobManager,
    id: JobId,
}

#[async_trait]
impl PipelineObserver for ProgressObserver<'_> {
    async fn on_step_start(&mut self, position: u32, name: &str, total: u32) {
        let detail = format!("Step {} of {}", position + 1, total);
        if let Err(e) = self
            .manager
            .update_progress(self.id, name, position, total, &detail)
            .await
        {
            tracing::debug!(job_id = %self.id, error = %e, "Step start progress not recorded");
        }
    }

    async fn on_step_complete(&mut self, step: &PipelineStep, total: u32) {
        if let Err(e) = self.manager.step_completed(self.id, step.clone(), total).await {
            tracing::debug!(job_id = %self.id, error = %e, "Step completion not recorded");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
