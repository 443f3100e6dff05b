//! Job record, lifecycle state machine, and submission DTOs.
//!
//! A [`Job`] moves `Pending -> Running -> {Completed | Failed | Cancelled}`,
//! or `Pending -> Cancelled`. Every mutation goes through a method on
//! [`Job`] that checks the transition first, so an illegal edge can never
//! be written to the record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::progress::ProgressSnapshot;
use crate::step::{self, PipelineStep};
use crate::types::{self, JobId, Timestamp};

/// Maximum length of a job title.
pub const MAX_TITLE_LEN: u64 = 200;

/// Maximum length of a job description.
pub const MAX_DESCRIPTION_LEN: u64 = 2000;

/// Characters of input text quoted in a generated description.
const DESCRIPTION_PREVIEW_CHARS: usize = 50;

/// Default page size for job listing.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Maximum page size for job listing.
pub const MAX_LIST_LIMIT: i64 = 100;

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// The fixed set of pipeline types a job can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Projection,
    Translation,
    Maieutic,
    ConfigGeneration,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Projection,
        JobKind::Translation,
        JobKind::Maieutic,
        JobKind::ConfigGeneration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Projection => "projection",
            JobKind::Translation => "translation",
            JobKind::Maieutic => "maieutic",
            JobKind::ConfigGeneration => "config_generation",
        }
    }

    /// Title used when the submitter does not provide one.
    pub fn default_title(self) -> &'static str {
        match self {
            JobKind::Projection => "Creating allegorical projection",
            JobKind::Translation => "Round-trip translation analysis",
            JobKind::Maieutic => "Maieutic dialogue session",
            JobKind::ConfigGeneration => "Generating attribute configuration",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job kind: \"{s}\"")))
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled jobs never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job status: \"{s}\"")))
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A submitted unit of work and everything known about its execution.
///
/// This is also the persisted record format: its serde representation is
/// what the store and the HTTP layer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub title: String,
    pub description: String,
    pub input: serde_json::Value,
    /// Present only once the job has completed successfully.
    pub result: Option<serde_json::Value>,
    /// Present only once the job has failed.
    pub error: Option<String>,
    pub progress: Option<ProgressSnapshot>,
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
    /// The job this one was resubmitted from.
    #[serde(default)]
    pub retry_of: Option<JobId>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// Everything needed to allocate a new pending job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: JobKind,
    pub title: String,
    pub description: String,
    pub input: serde_json::Value,
    pub retry_of: Option<JobId>,
}

impl NewJob {
    pub fn new(
        kind: JobKind,
        title: impl Into<String>,
        description: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            description: description.into(),
            input,
            retry_of: None,
        }
    }

    /// A fresh submission carrying over `original`'s parameters.
    pub fn resubmission_of(original: &Job) -> Self {
        Self {
            kind: original.kind,
            title: original.title.clone(),
            description: original.description.clone(),
            input: original.input.clone(),
            retry_of: Some(original.id),
        }
    }
}

impl Job {
    /// Allocate a pending job with a new id and the current time.
    pub fn new(new: NewJob) -> Self {
        Self::with_id(types::new_job_id(), new, types::now())
    }

    /// Allocate a pending job with an explicit id and creation time.
    pub fn with_id(id: JobId, new: NewJob, created_at: Timestamp) -> Self {
        Self {
            id,
            kind: new.kind,
            status: JobStatus::Pending,
            title: new.title,
            description: new.description,
            input: new.input,
            result: None,
            error: None,
            progress: None,
            steps: Vec::new(),
            retry_of: new.retry_of,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `Pending -> Running`. Sets `started_at`.
    pub fn start(&mut self, at: Timestamp) -> Result<(), CoreError> {
        self.check_transition(JobStatus::Running)?;
        self.started_at = Some(at.max(self.created_at));
        self.status = JobStatus::Running;
        Ok(())
    }

    /// `Running -> Completed` with the final result payload. A completed
    /// job always carries a result, so `null` is rejected.
    pub fn complete(&mut self, result: serde_json::Value, at: Timestamp) -> Result<(), CoreError> {
        self.check_transition(JobStatus::Completed)?;
        if result.is_null() {
            return Err(CoreError::Validation("completion result must not be null".into()));
        }
        self.result = Some(result);
        self.finish(JobStatus::Completed, at);
        Ok(())
    }

    /// `Running -> Failed` with an error message.
    pub fn fail(&mut self, message: impl Into<String>, at: Timestamp) -> Result<(), CoreError> {
        self.check_transition(JobStatus::Failed)?;
        self.error = Some(message.into());
        self.finish(JobStatus::Failed, at);
        Ok(())
    }

    /// `Pending | Running -> Cancelled`.
    pub fn cancel(&mut self, at: Timestamp) -> Result<(), CoreError> {
        self.check_transition(JobStatus::Cancelled)?;
        self.finish(JobStatus::Cancelled, at);
        Ok(())
    }

    /// Replace the progress snapshot. Only valid while running, and the
    /// percentage may not go backwards.
    pub fn set_progress(&mut self, snapshot: ProgressSnapshot) -> Result<(), CoreError> {
        self.require_running(JobStatus::Running)?;
        if let Some(current) = &self.progress {
            if snapshot.percentage < current.percentage {
                return Err(CoreError::Validation(format!(
                    "Progress for job {} would regress from {:.1}% to {:.1}%",
                    self.id, current.percentage, snapshot.percentage
                )));
            }
        }
        self.progress = Some(snapshot);
        Ok(())
    }

    /// Append a completed step record. Only valid while running.
    pub fn record_step(&mut self, step: PipelineStep) -> Result<(), CoreError> {
        self.require_running(JobStatus::Running)?;
        self.steps.push(step);
        Ok(())
    }

    fn finish(&mut self, status: JobStatus, at: Timestamp) {
        let floor = self.started_at.unwrap_or(self.created_at);
        self.completed_at = Some(at.max(floor));
        self.status = status;
    }

    fn check_transition(&self, to: JobStatus) -> Result<(), CoreError> {
        if self.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            })
        }
    }

    fn require_running(&self, attempted: JobStatus) -> Result<(), CoreError> {
        if self.status == JobStatus::Running {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: attempted,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Submission DTO
// ---------------------------------------------------------------------------

/// Body of a job submission request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitJob {
    pub kind: JobKind,
    #[validate(length(min = 1, max = MAX_TITLE_LEN))]
    pub title: Option<String>,
    #[validate(length(max = MAX_DESCRIPTION_LEN))]
    pub description: Option<String>,
    #[serde(default)]
    pub input: serde_json::Value,
}

impl SubmitJob {
    /// Fill in defaults for missing title and description.
    pub fn into_new_job(self) -> NewJob {
        let title = self
            .title
            .unwrap_or_else(|| self.kind.default_title().to_string());
        let description = self
            .description
            .unwrap_or_else(|| describe_input(self.kind, &self.input));
        NewJob::new(self.kind, title, description, self.input)
    }
}

/// Short human description of a job's input, e.g.
/// `"projection: A farmer finds a golden..."`.
pub fn describe_input(kind: JobKind, input: &serde_json::Value) -> String {
    let text = ["narrative", "text", "name"]
        .iter()
        .find_map(|key| input.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| step::preview(input));
    format!("{kind}: {}", step::truncate(&text, DESCRIPTION_PREVIEW_CHARS))
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Filter and paging options for job listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<JobStatus>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

impl JobListQuery {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(0, MAX_LIST_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Number of stored jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: JobStatus, n: u64) {
        let slot = match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Running => &mut self.running,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Cancelled => &mut self.cancelled,
        };
        *slot += n;
    }

    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Running => self.running,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Cancelled => self.cancelled,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use proptest::prelude::*;
    use serde_json::json;

    fn pending_job() -> Job {
        Job::new(NewJob::new(
            JobKind::Projection,
            "Creating allegorical projection",
            "projection: a short tale",
            json!({"narrative": "a short tale", "persona": "philosopher"}),
        ))
    }

    fn step_record(position: u32) -> PipelineStep {
        PipelineStep {
            position,
            name: format!("step {position}"),
            step_type: "deconstruct".into(),
            input_snapshot: "in".into(),
            output_snapshot: "out".into(),
            metadata: json!({}),
            duration_ms: 12,
            completed_at: types::now(),
        }
    }

    // -- state machine --------------------------------------------------------

    #[test]
    fn legal_edges() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));
    }

    #[test]
    fn pending_cannot_skip_running() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in JobStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn new_job_is_pending_and_blank() {
        let job = pending_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(job.progress.is_none());
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn start_sets_started_at() {
        let mut job = pending_job();
        job.start(types::now()).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
    }

    #[test]
    fn start_twice_is_invalid() {
        let mut job = pending_job();
        job.start(types::now()).unwrap();
        let err = job.start(types::now()).unwrap_err();
        assert_matches!(
            err,
            CoreError::InvalidTransition {
                from: JobStatus::Running,
                to: JobStatus::Running,
                ..
            }
        );
    }

    #[test]
    fn complete_from_pending_is_invalid() {
        let mut job = pending_job();
        assert_matches!(
            job.complete(json!({}), types::now()),
            Err(CoreError::InvalidTransition { .. })
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
    }

    #[test]
    fn complete_sets_result_only() {
        let mut job = pending_job();
        job.start(types::now()).unwrap();
        job.complete(json!({"output": "done"}), types::now()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"output": "done"})));
        assert!(job.error.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn complete_rejects_null_result() {
        let mut job = pending_job();
        job.start(types::now()).unwrap();
        assert_matches!(
            job.complete(serde_json::Value::Null, types::now()),
            Err(CoreError::Validation(_))
        );
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.result.is_none());
        assert!(job.completed_at.is_none());

        // A real result still completes, and the record survives a round trip.
        job.complete(json!("done"), types::now()).unwrap();
        let back: Job = serde_json::from_value(serde_json::to_value(&job).unwrap()).unwrap();
        assert_eq!(back, job);
        assert_eq!(back.result, Some(json!("done")));
    }

    #[test]
    fn fail_sets_error_only() {
        let mut job = pending_job();
        job.start(types::now()).unwrap();
        job.fail("model unavailable", types::now()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("model unavailable"));
        assert!(job.result.is_none());
    }

    #[test]
    fn cancel_pending_never_sets_started_at() {
        let mut job = pending_job();
        job.cancel(types::now()).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn timestamps_never_run_backwards() {
        let mut job = pending_job();
        let earlier = job.created_at - Duration::seconds(10);
        job.start(earlier).unwrap();
        assert_eq!(job.started_at, Some(job.created_at));
        job.fail("x", earlier).unwrap();
        assert!(job.completed_at.unwrap() >= job.started_at.unwrap());
    }

    #[test]
    fn progress_requires_running() {
        let mut job = pending_job();
        let snap = ProgressSnapshot::compute("Deconstructing narrative", 0, 5, "");
        assert_matches!(
            job.set_progress(snap),
            Err(CoreError::InvalidTransition { .. })
        );
    }

    #[test]
    fn progress_cannot_regress() {
        let mut job = pending_job();
        job.start(types::now()).unwrap();
        job.set_progress(ProgressSnapshot::compute("b", 2, 4, ""))
            .unwrap();
        assert_matches!(
            job.set_progress(ProgressSnapshot::compute("a", 1, 4, "")),
            Err(CoreError::Validation(_))
        );
        assert_eq!(job.progress.as_ref().unwrap().completed_steps, 2);
    }

    #[test]
    fn steps_only_recorded_while_running() {
        let mut job = pending_job();
        assert!(job.record_step(step_record(0)).is_err());
        job.start(types::now()).unwrap();
        job.record_step(step_record(0)).unwrap();
        job.cancel(types::now()).unwrap();
        assert!(job.record_step(step_record(1)).is_err());
        assert_eq!(job.steps.len(), 1);
    }

    // -- serialization ----------------------------------------------------------

    #[test]
    fn record_uses_persisted_field_names() {
        let mut job = pending_job();
        job.start(types::now()).unwrap();
        job.set_progress(ProgressSnapshot::compute("Mapping", 1, 5, "detail"))
            .unwrap();
        let value = serde_json::to_value(&job).unwrap();
        for key in [
            "id",
            "kind",
            "status",
            "title",
            "description",
            "input",
            "result",
            "error",
            "progress",
            "createdAt",
            "startedAt",
            "completedAt",
        ] {
            assert!(value.get(key).is_some(), "missing field {key}");
        }
        assert_eq!(value["status"], "running");
        assert_eq!(value["kind"], "projection");
        assert_eq!(value["progress"]["completedSteps"], 1);
    }

    #[test]
    fn record_round_trips_field_for_field() {
        let mut job = pending_job();
        job.start(types::now()).unwrap();
        job.set_progress(ProgressSnapshot::compute("Mapping", 1, 5, "detail"))
            .unwrap();
        job.record_step(step_record(0)).unwrap();
        job.complete(json!({"output": "allegory", "reflection": null}), types::now())
            .unwrap();

        let text = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&text).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn kind_and_status_parse_from_wire_names() {
        assert_eq!("config_generation".parse::<JobKind>().unwrap(), JobKind::ConfigGeneration);
        assert_eq!("cancelled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert!("exploding".parse::<JobStatus>().is_err());
    }

    // -- submission ---------------------------------------------------------------

    #[test]
    fn submission_defaults_title_and_description() {
        let submit = SubmitJob {
            kind: JobKind::Translation,
            title: None,
            description: None,
            input: json!({"text": "The quick brown fox", "intermediate_language": "german"}),
        };
        let new = submit.into_new_job();
        assert_eq!(new.title, "Round-trip translation analysis");
        assert_eq!(new.description, "translation: The quick brown fox");
    }

    #[test]
    fn empty_title_fails_validation() {
        let submit = SubmitJob {
            kind: JobKind::Projection,
            title: Some(String::new()),
            description: None,
            input: json!({}),
        };
        assert!(submit.validate().is_err());
    }

    #[test]
    fn resubmission_links_original() {
        let original = pending_job();
        let new = NewJob::resubmission_of(&original);
        assert_eq!(new.retry_of, Some(original.id));
        assert_eq!(new.input, original.input);
    }

    #[test]
    fn list_query_limits_are_clamped() {
        let q = JobListQuery {
            limit: Some(10_000),
            offset: Some(-5),
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), MAX_LIST_LIMIT);
        assert_eq!(q.effective_offset(), 0);
        assert_eq!(JobListQuery::default().effective_limit(), DEFAULT_LIST_LIMIT);
    }

    #[test]
    fn status_counts_total() {
        let mut counts = StatusCounts::default();
        counts.add(JobStatus::Pending, 2);
        counts.add(JobStatus::Failed, 1);
        assert_eq!(counts.get(JobStatus::Pending), 2);
        assert_eq!(counts.total(), 3);
    }

    // -- property: random operation sequences ------------------------------------

    #[derive(Debug, Clone)]
    enum Op {
        Start,
        Progress(u32),
        Step,
        Complete,
        Fail,
        Cancel,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Start),
            (0u32..=6).prop_map(Op::Progress),
            Just(Op::Step),
            Just(Op::Complete),
            Just(Op::Fail),
            Just(Op::Cancel),
        ]
    }

    proptest! {
        #[test]
        fn random_operations_never_break_invariants(ops in prop::collection::vec(op_strategy(), 0..24)) {
            let mut job = pending_job();
            let mut last_pct = 0.0_f64;

            for op in ops {
                let before = job.status;
                let outcome = match op {
                    Op::Start => job.start(types::now()),
                    Op::Progress(done) => job.set_progress(ProgressSnapshot::compute("s", done, 6, "")),
                    Op::Step => job.record_step(step_record(job.steps.len() as u32)),
                    Op::Complete => job.complete(json!({"ok": true}), types::now()),
                    Op::Fail => job.fail("boom", types::now()),
                    Op::Cancel => job.cancel(types::now()),
                };
                let after = job.status;

                if outcome.is_ok() && before != after {
                    prop_assert!(before.can_transition_to(after), "illegal edge {before} -> {after}");
                }
                if outcome.is_err() {
                    prop_assert_eq!(before, after);
                }
                if before.is_terminal() {
                    prop_assert_eq!(after, before);
                }

                // started_at before running, completed_at exactly at terminal.
                if after != JobStatus::Pending && after != JobStatus::Cancelled {
                    prop_assert!(job.started_at.is_some());
                }
                prop_assert_eq!(job.completed_at.is_some(), after.is_terminal());

                // result/error exclusivity.
                match after {
                    JobStatus::Completed => prop_assert!(job.result.is_some() && job.error.is_none()),
                    JobStatus::Failed => prop_assert!(job.error.is_some() && job.result.is_none()),
                    _ => prop_assert!(job.result.is_none() && job.error.is_none()),
                }

                // timestamp ordering.
                if let Some(started) = job.started_at {
                    prop_assert!(job.created_at <= started);
                    if let Some(done) = job.completed_at {
                        prop_assert!(started <= done);
                    }
                }

                // monotonic progress.
                if let Some(p) = &job.progress {
                    prop_assert!(p.percentage >= last_pct);
                    last_pct = p.percentage;
                }
            }
        }
    }
}
