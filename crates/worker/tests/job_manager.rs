//! Integration tests for `JobManager`: lifecycle, concurrency, cancellation,
//! recovery and notification delivery.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use lpe_core::error::CoreError;
use lpe_core::job::{Job, JobKind, JobListQuery, JobStatus, NewJob};
use lpe_core::job_events::{self, Notification};
use lpe_core::types;
use lpe_db::{JobStore, MemoryJobStore};
use lpe_events::LocalChannel;
use lpe_pipeline::{step_fn, ExecutorFactory, Pipeline, PipelineCatalog, StepExecutor, StepFailure};
use lpe_worker::manager::INTERRUPTED_BY_RESTART;
use lpe_worker::{RecoveryReport, WorkerConfig};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use common::*;

async fn submit(h: &Harness, text: &str) -> types::JobId {
    h.manager
        .submit(
            JobKind::Projection,
            "Creating allegorical projection",
            format!("projection: {text}"),
            json!({ "narrative": text }),
        )
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Test: a job runs every step and completes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_completes_with_every_step_recorded() {
    let h = harness(
        fixed(
            Pipeline::new()
                .stage("First", "a", echo())
                .stage("Second", "b", echo())
                .reflect("Reflecting", "reflect", echo()),
        ),
        config(2),
    );

    let id = submit(&h, "a farmer").await;
    let job = wait_for_status(&h.manager, id, JobStatus::Completed).await;

    assert_eq!(job.steps.len(), 3);
    let positions: Vec<u32> = job.steps.iter().map(|s| s.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    assert_eq!(
        job.result,
        Some(json!({
            "output": {"narrative": "a farmer"},
            "reflection": {"narrative": "a farmer"},
        }))
    );
    let progress = job.progress.unwrap();
    assert_eq!(progress.completed_steps, 3);
    assert_eq!(progress.percentage, 100.0);
    assert!(job.started_at.unwrap() <= job.completed_at.unwrap());

    // The terminal state reached the store and the cache let go of it.
    let stored = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(h.manager.active_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: a failing step fails the job and later steps never run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_step_fails_job() {
    let third = Arc::new(AtomicU32::new(0));
    let h = harness(
        fixed(
            Pipeline::new()
                .stage("Deconstructing narrative", "deconstruct", echo())
                .stage("Mapping to namespace", "map", failing("model unavailable"))
                .stage("Reconstructing allegory", "reconstruct", counting(Arc::clone(&third))),
        ),
        config(2),
    );

    let id = submit(&h, "a farmer").await;
    let job = wait_for_status(&h.manager, id, JobStatus::Failed).await;

    let error = job.error.unwrap();
    assert!(error.contains("Mapping to namespace"), "{error}");
    assert!(error.contains("model unavailable"), "{error}");
    assert_eq!(job.steps.len(), 1);
    assert_eq!(job.steps[0].name, "Deconstructing narrative");
    assert_eq!(third.load(Ordering::SeqCst), 0);
    assert!(job.result.is_none());
}

// ---------------------------------------------------------------------------
// Test: a panicking step fails the job instead of killing the worker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn panicking_step_fails_job() {
    let h = harness(fixed(Pipeline::new().stage("Boom", "boom", Arc::new(Panics))), config(1));

    let id = submit(&h, "x").await;
    let job = wait_for_status(&h.manager, id, JobStatus::Failed).await;
    assert_eq!(job.error.as_deref(), Some("Worker panicked: kaboom"));

    // The pool keeps working afterwards.
    let next = submit(&h, "y").await;
    wait_for_status(&h.manager, next, JobStatus::Failed).await;
}

// ---------------------------------------------------------------------------
// Test: the pool bounds concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_worker_runs_jobs_one_at_a_time() {
    let release = CancellationToken::new();
    let h = harness(fixed(Pipeline::new().stage("Wait", "wait", gated(release.clone()))), config(1));

    let first = submit(&h, "first").await;
    wait_for_status(&h.manager, first, JobStatus::Running).await;
    let second = submit(&h, "second").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.manager.get(second).await.unwrap().status, JobStatus::Pending);
    let stats = h.manager.stats().await.unwrap();
    assert_eq!(stats.active, 1);
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.max_concurrent, 1);

    release.cancel();
    let first = wait_for_status(&h.manager, first, JobStatus::Completed).await;
    let second = wait_for_status(&h.manager, second, JobStatus::Completed).await;
    assert!(second.started_at.unwrap() >= first.completed_at.unwrap());
}

#[tokio::test]
async fn full_queue_rejects_submission() {
    let release = CancellationToken::new();
    let h = harness(
        fixed(Pipeline::new().stage("Wait", "wait", gated(release.clone()))),
        WorkerConfig {
            max_queued_jobs: Some(1),
            ..config(1)
        },
    );

    let running = submit(&h, "running").await;
    wait_for_status(&h.manager, running, JobStatus::Running).await;
    let _queued = submit(&h, "queued").await;

    let err = h
        .manager
        .submit(JobKind::Projection, "t", "d", json!({}))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::CapacityExceeded { queued: 1 });
    assert_eq!(h.store.count_by_status().await.unwrap().total(), 2);

    release.cancel();
}

// ---------------------------------------------------------------------------
// Test: cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_pending_job_never_starts_it() {
    let release = CancellationToken::new();
    let h = harness(fixed(Pipeline::new().stage("Wait", "wait", gated(release.clone()))), config(1));

    let first = submit(&h, "first").await;
    wait_for_status(&h.manager, first, JobStatus::Running).await;
    let second = submit(&h, "second").await;

    h.manager.cancel(second).await.unwrap();
    release.cancel();
    wait_for_status(&h.manager, first, JobStatus::Completed).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = h.manager.get(second).await.unwrap();
    assert_eq!(second.status, JobStatus::Cancelled);
    assert!(second.started_at.is_none());
    assert!(second.completed_at.is_some());
    assert!(second.steps.is_empty());
}

#[tokio::test]
async fn cancel_running_job_stops_pipeline() {
    let release = CancellationToken::new();
    let after = Arc::new(AtomicU32::new(0));
    let h = harness(
        fixed(
            Pipeline::new()
                .stage("Wait", "wait", gated(release.clone()))
                .stage("After", "after", counting(Arc::clone(&after))),
        ),
        config(1),
    );

    let id = submit(&h, "x").await;
    wait_for_status(&h.manager, id, JobStatus::Running).await;
    h.manager.cancel(id).await.unwrap();

    let job = wait_for_status(&h.manager, id, JobStatus::Cancelled).await;
    assert!(job.error.is_none());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(after.load(Ordering::SeqCst), 0);
    assert_eq!(h.manager.get(id).await.unwrap().status, JobStatus::Cancelled);
    assert_eq!(h.manager.active_count().await, 0);
}

#[tokio::test]
async fn cancel_terminal_job_is_invalid() {
    let h = harness(fixed(Pipeline::new().stage("Echo", "echo", echo())), config(1));
    let id = submit(&h, "x").await;
    wait_for_status(&h.manager, id, JobStatus::Completed).await;

    let err = h.manager.cancel(id).await.unwrap_err();
    assert_matches!(
        err,
        CoreError::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Cancelled,
            ..
        }
    );
}

#[tokio::test]
async fn null_completion_result_is_rejected() {
    let release = CancellationToken::new();
    let h = harness(fixed(Pipeline::new().stage("Wait", "wait", gated(release.clone()))), config(1));
    let id = submit(&h, "x").await;
    wait_for_status(&h.manager, id, JobStatus::Running).await;

    let err = h.manager.complete(id, Value::Null).await.unwrap_err();
    assert_matches!(err, CoreError::Validation(_));
    let job = h.manager.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.result.is_none());

    release.cancel();
    let job = wait_for_status(&h.manager, id, JobStatus::Completed).await;
    assert!(job.result.is_some_and(|r| !r.is_null()));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = harness(fixed(Pipeline::new()), config(1));
    let id = types::new_job_id();
    assert_matches!(h.manager.get(id).await, Err(CoreError::NotFound { .. }));
    assert_matches!(h.manager.cancel(id).await, Err(CoreError::NotFound { .. }));
    assert_matches!(
        h.manager.update_progress(id, "x", 0, 1, "").await,
        Err(CoreError::NotFound { .. })
    );
}

#[tokio::test]
async fn progress_for_finished_job_is_ignored() {
    let h = harness(fixed(Pipeline::new().stage("Echo", "echo", echo())), config(1));
    let id = submit(&h, "x").await;
    let before = wait_for_status(&h.manager, id, JobStatus::Completed).await;

    h.manager.update_progress(id, "Late", 0, 4, "ignored").await.unwrap();
    assert_eq!(h.manager.get(id).await.unwrap().progress, before.progress);
}

// ---------------------------------------------------------------------------
// Test: submission validation through the catalog
// ---------------------------------------------------------------------------

struct Echo;

impl ExecutorFactory for Echo {
    fn executor(&self, _kind: JobKind, _step_type: &str) -> Arc<dyn StepExecutor> {
        step_fn(|_ctx, input: Value| async move { Ok::<_, StepFailure>(input) })
    }
}

#[tokio::test]
async fn invalid_input_is_rejected_before_storing() {
    let h = harness(PipelineCatalog::new(Arc::new(Echo)), config(1));

    let err = h
        .manager
        .submit(JobKind::Maieutic, "Maieutic dialogue session", "d", json!({"max_turns": 11}))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::Validation(_));
    assert_eq!(h.store.count_by_status().await.unwrap().total(), 0);
}

#[tokio::test]
async fn maieutic_job_runs_requested_turns() {
    let h = harness(PipelineCatalog::new(Arc::new(Echo)), config(1));

    let id = h
        .manager
        .submit(
            JobKind::Maieutic,
            "Maieutic dialogue session",
            "maieutic: why",
            json!({"text": "why", "max_turns": 2}),
        )
        .await
        .unwrap();
    let job = wait_for_status(&h.manager, id, JobStatus::Completed).await;
    let names: Vec<&str> = job.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Starting dialogue session", "Generating question 1", "Generating question 2"]
    );
}

// ---------------------------------------------------------------------------
// Test: resubmission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_job_can_be_resubmitted() {
    let h = harness(fixed(Pipeline::new().stage("Fail", "fail", failing("nope"))), config(1));
    let original = submit(&h, "again").await;
    wait_for_status(&h.manager, original, JobStatus::Failed).await;

    let retry = h.manager.resubmit(original).await.unwrap();
    assert_ne!(retry, original);
    let job = wait_for_status(&h.manager, retry, JobStatus::Failed).await;
    assert_eq!(job.retry_of, Some(original));
    assert_eq!(job.input, json!({"narrative": "again"}));
}

#[tokio::test]
async fn completed_job_cannot_be_resubmitted() {
    let h = harness(fixed(Pipeline::new().stage("Echo", "echo", echo())), config(1));
    let id = submit(&h, "x").await;
    wait_for_status(&h.manager, id, JobStatus::Completed).await;

    assert_matches!(
        h.manager.resubmit(id).await,
        Err(CoreError::InvalidTransition {
            to: JobStatus::Pending,
            ..
        })
    );
}

// ---------------------------------------------------------------------------
// Test: recovery after restart
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recover_fails_running_and_reschedules_pending() {
    let store = Arc::new(MemoryJobStore::new());
    let mut interrupted = store
        .create(NewJob::new(JobKind::Translation, "t", "d", json!({})))
        .await
        .unwrap();
    interrupted.start(types::now()).unwrap();
    store.save(&interrupted).await.unwrap();
    let waiting = store
        .create(NewJob::new(JobKind::Translation, "t", "d", json!({"text": "hi"})))
        .await
        .unwrap();

    let h = harness_with_store(store, fixed(Pipeline::new().stage("Echo", "echo", echo())), config(1));
    let report = h.manager.recover().await.unwrap();
    assert_eq!(
        report,
        RecoveryReport {
            failed: 1,
            rescheduled: 1
        }
    );

    let interrupted = h.manager.get(interrupted.id).await.unwrap();
    assert_eq!(interrupted.status, JobStatus::Failed);
    assert_eq!(interrupted.error.as_deref(), Some(INTERRUPTED_BY_RESTART));

    let waiting = wait_for_status(&h.manager, waiting.id, JobStatus::Completed).await;
    assert_eq!(waiting.steps.len(), 1);

    // Nothing left to recover.
    assert_eq!(h.manager.recover().await.unwrap(), RecoveryReport::default());
}

// ---------------------------------------------------------------------------
// Test: retention and stats
// ---------------------------------------------------------------------------

fn aged_job(status: JobStatus, days: i64) -> Job {
    let created = types::now() - chrono::Duration::days(days);
    let mut job = Job::with_id(
        types::new_job_id(),
        NewJob::new(JobKind::ConfigGeneration, "t", "d", json!({})),
        created,
    );
    if status != JobStatus::Pending {
        job.start(created).unwrap();
        job.complete(json!({}), created).unwrap();
    }
    job
}

#[tokio::test]
async fn cleanup_removes_only_old_terminal_jobs() {
    let h = harness(fixed(Pipeline::new()), config(1));
    let old_done = aged_job(JobStatus::Completed, 40);
    let old_pending = aged_job(JobStatus::Pending, 40);
    let recent_done = aged_job(JobStatus::Completed, 1);
    for job in [&old_done, &old_pending, &recent_done] {
        h.store.save(job).await.unwrap();
    }

    let deleted = h.manager.cleanup_expired(chrono::Duration::days(30)).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(h.store.get(old_done.id).await.unwrap().is_none());
    assert!(h.store.get(old_pending.id).await.unwrap().is_some());
    assert!(h.store.get(recent_done.id).await.unwrap().is_some());
}

#[tokio::test]
async fn stats_count_jobs_by_status() {
    let h = harness(fixed(Pipeline::new().stage("Echo", "echo", echo())), config(3));
    let a = submit(&h, "a").await;
    let b = submit(&h, "b").await;
    wait_for_status(&h.manager, a, JobStatus::Completed).await;
    wait_for_status(&h.manager, b, JobStatus::Completed).await;

    let stats = h.manager.stats().await.unwrap();
    assert_eq!(stats.counts.completed, 2);
    assert_eq!(stats.counts.total(), 2);
    assert_eq!(stats.max_concurrent, 3);
    assert_eq!(stats.active, 0);

    let listed = h.manager.list(&JobListQuery::with_status(JobStatus::Completed)).await.unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn status_filter_applies_to_live_records() {
    let release = CancellationToken::new();
    let h = harness(fixed(Pipeline::new().stage("Wait", "wait", gated(release.clone()))), config(1));
    let id = submit(&h, "x").await;
    let running = wait_for_status(&h.manager, id, JobStatus::Running).await;

    // Leave a stale pending row behind the live running record.
    let mut stale = running.clone();
    stale.status = JobStatus::Pending;
    stale.started_at = None;
    stale.progress = None;
    h.store.save(&stale).await.unwrap();

    let pending = h.manager.list(&JobListQuery::with_status(JobStatus::Pending)).await.unwrap();
    assert!(pending.is_empty(), "live status is running: {pending:?}");
    let all = h.manager.list(&JobListQuery::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, JobStatus::Running);

    release.cancel();
    wait_for_status(&h.manager, id, JobStatus::Completed).await;
}

// ---------------------------------------------------------------------------
// Test: terminal persistence retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn terminal_save_is_retried() {
    let store = Arc::new(FlakyStore::new(2));
    let h = harness_with_store(store, fixed(Pipeline::new().stage("Echo", "echo", echo())), config(1));

    let id = submit(&h, "x").await;
    wait_for_status(&h.manager, id, JobStatus::Completed).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.store.get(id).await.unwrap().unwrap().status, JobStatus::Completed);
    assert_eq!(h.manager.active_count().await, 0);
}

#[tokio::test]
async fn exhausted_terminal_save_keeps_job_cached() {
    let store = Arc::new(FlakyStore::new(100));
    let h = harness_with_store(store, fixed(Pipeline::new().stage("Echo", "echo", echo())), config(1));

    let id = submit(&h, "x").await;
    wait_for_status(&h.manager, id, JobStatus::Completed).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.store.get(id).await.unwrap().unwrap().status, JobStatus::Running);
    assert_eq!(h.manager.get(id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(h.manager.active_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_rejects_new_jobs() {
    let h = harness(fixed(Pipeline::new().stage("Echo", "echo", echo())), config(1));
    h.manager.shutdown(Duration::from_millis(100)).await;

    assert_matches!(
        h.manager.submit(JobKind::Projection, "t", "d", json!({})).await,
        Err(CoreError::ShuttingDown)
    );
}

#[tokio::test]
async fn shutdown_cancels_jobs_that_outlive_grace() {
    let h = harness(fixed(Pipeline::new().stage("Wait", "wait", gated(CancellationToken::new()))), config(1));
    let id = submit(&h, "x").await;
    wait_for_status(&h.manager, id, JobStatus::Running).await;

    h.manager.shutdown(Duration::from_millis(50)).await;

    let job = h.manager.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// Test: watchers and lifecycle events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn watcher_sees_ordered_progress_then_terminal_status() {
    let release = CancellationToken::new();
    let h = harness(
        fixed(
            Pipeline::new()
                .stage("Wait", "wait", gated(release.clone()))
                .stage("Second", "b", echo())
                .stage("Third", "c", echo()),
        ),
        config(1),
    );

    let id = submit(&h, "x").await;
    let job = wait_for_status(&h.manager, id, JobStatus::Running).await;
    let (channel, mut rx) = LocalChannel::new();
    h.hub.subscribe(Arc::new(channel), &job).await.unwrap();
    release.cancel();

    let mut percentages = Vec::new();
    let last = loop {
        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match message {
            Notification::Progress { data, .. } => percentages.push(data.percentage),
            Notification::Status { ref data, .. } if data.status.is_terminal() => break message,
            Notification::Status { .. } => {}
        }
    };

    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{percentages:?}");
    assert_eq!(percentages.last(), Some(&100.0));
    assert_matches!(
        last,
        Notification::Status { job_id, ref data } if job_id == id && data.status == JobStatus::Completed && data.result.is_some()
    );
    assert_eq!(h.hub.subscriber_count(id).await, 0);
}

#[tokio::test]
async fn lifecycle_events_are_published() {
    let h = harness(fixed(Pipeline::new().stage("Echo", "echo", echo())), config(1));
    let mut events = h.bus.subscribe();

    let id = submit(&h, "x").await;
    wait_for_status(&h.manager, id, JobStatus::Completed).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.job_id, Some(id));
        seen.push(event.event_type);
    }
    assert_eq!(seen.first().map(String::as_str), Some(job_events::JOB_SUBMITTED));
    assert_eq!(seen.get(1).map(String::as_str), Some(job_events::JOB_STARTED));
    assert_eq!(seen.last().map(String::as_str), Some(job_events::JOB_COMPLETED));
    assert!(seen.iter().any(|t| t == job_events::JOB_PROGRESS));
}
