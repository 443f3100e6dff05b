//! Sequential stage runner.
//!
//! Stages execute strictly one after another. Each feed-forward stage
//! receives the previous stage's output; the optional reflection stage
//! receives the last feed-forward output and its own output is reported
//! separately. A [`PipelineStep`] record is produced for every stage that
//! returns successfully, before the next stage starts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lpe_core::job::JobKind;
use lpe_core::step::{self, PipelineStep};
use lpe_core::types::{self, JobId};
use tokio_util::sync::CancellationToken;

use crate::executor::{StepContext, StepExecutor};

/// A named stage bound to its executor.
#[derive(Clone)]
pub struct Stage {
    pub name: String,
    pub step_type: String,
    pub executor: Arc<dyn StepExecutor>,
}

/// Receives step boundaries while a pipeline runs.
#[async_trait]
pub trait PipelineObserver: Send {
    /// Called just before stage `position` executes.
    async fn on_step_start(&mut self, position: u32, name: &str, total: u32);

    /// Called once stage `step.position` has returned successfully.
    async fn on_step_complete(&mut self, step: &PipelineStep, total: u32);
}

/// Observer that ignores every callback.
pub struct NoopObserver;

#[async_trait]
impl PipelineObserver for NoopObserver {
    async fn on_step_start(&mut self, _position: u32, _name: &str, _total: u32) {}

    async fn on_step_complete(&mut self, _step: &PipelineStep, _total: u32) {}
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// Output of the last feed-forward stage (or the input if there were none).
    pub output: serde_json::Value,
    /// Output of the reflection stage, if the pipeline has one.
    pub reflection: Option<serde_json::Value>,
    pub steps: Vec<PipelineStep>,
}

impl PipelineOutput {
    /// The job result document: `{"output": ..., "reflection": ...}`.
    pub fn into_result(self) -> serde_json::Value {
        serde_json::json!({
            "output": self.output,
            "reflection": self.reflection,
        })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineErrorKind {
    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("Step '{step}' timed out after {}s", .after.as_secs_f64())]
    TimedOut { step: String, after: Duration },

    #[error("Pipeline cancelled")]
    Cancelled,
}

/// A run that did not finish, with the steps that did complete.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct PipelineError {
    pub kind: PipelineErrorKind,
    pub steps: Vec<PipelineStep>,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        self.kind == PipelineErrorKind::Cancelled
    }
}

/// An ordered list of stages plus an optional reflection stage.
#[derive(Clone, Default)]
pub struct Pipeline {
    job_kind: Option<JobKind>,
    stages: Vec<Stage>,
    reflection: Option<Stage>,
    step_timeout: Option<Duration>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("job_kind", &self.job_kind)
            .field("stages", &self.stages.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("reflection", &self.reflection.as_ref().map(|s| &s.name))
            .field("step_timeout", &self.step_timeout)
            .finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a feed-forward stage.
    pub fn stage(
        mut self,
        name: impl Into<String>,
        step_type: impl Into<String>,
        executor: Arc<dyn StepExecutor>,
    ) -> Self {
        self.stages.push(Stage {
            name: name.into(),
            step_type: step_type.into(),
            executor,
        });
        self
    }

    /// Set the final reflection stage.
    pub fn reflect(
        mut self,
        name: impl Into<String>,
        step_type: impl Into<String>,
        executor: Arc<dyn StepExecutor>,
    ) -> Self {
        self.reflection = Some(Stage {
            name: name.into(),
            step_type: step_type.into(),
            executor,
        });
        self
    }

    /// Bound every stage call; expiry fails the run.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    pub fn for_kind(mut self, kind: JobKind) -> Self {
        self.job_kind = Some(kind);
        self
    }

    pub fn total_steps(&self) -> u32 {
        (self.stages.len() + usize::from(self.reflection.is_some())) as u32
    }

    /// Stage names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.stages
            .iter()
            .chain(self.reflection.iter())
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Execute every stage in order.
    ///
    /// `cancel` is checked before each stage and once more after the last.
    pub async fn run(
        &self,
        job_id: JobId,
        input: serde_json::Value,
        cancel: &CancellationToken,
        observer: &mut dyn PipelineObserver,
    ) -> Result<PipelineOutput, PipelineError> {
        let total = self.total_steps();
        let mut steps = Vec::with_capacity(total as usize);
        let mut current = input;
        let mut reflection = None;

        let ordered = self
            .stages
            .iter()
            .map(|s| (s, false))
            .chain(self.reflection.iter().map(|s| (s, true)));

        for (position, (stage, is_reflection)) in (0u32..).zip(ordered) {
            if cancel.is_cancelled() {
                return Err(PipelineError {
                    kind: PipelineErrorKind::Cancelled,
                    steps,
                });
            }

            observer.on_step_start(position, &stage.name, total).await;

            let ctx = StepContext {
                job_id,
                job_kind: self.job_kind,
                step_name: stage.name.clone(),
                step_type: stage.step_type.clone(),
                position,
                cancel: cancel.clone(),
            };

            let started = Instant::now();
            let output = match self.call(stage, &ctx, current.clone()).await {
                Ok(output) => output,
                Err(kind) => {
                    tracing::debug!(job_id = %job_id, step = %stage.name, error = %kind, "Pipeline step did not complete");
                    // A step aborted by cancellation reports the cancellation.
                    let kind = if cancel.is_cancelled() {
                        PipelineErrorKind::Cancelled
                    } else {
                        kind
                    };
                    return Err(PipelineError { kind, steps });
                }
            };
            let elapsed = started.elapsed();

            let record = PipelineStep {
                position,
                name: stage.name.clone(),
                step_type: stage.step_type.clone(),
                input_snapshot: step::preview(&current),
                output_snapshot: step::preview(&output),
                metadata: serde_json::json!({ "stepType": stage.step_type }),
                duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                completed_at: types::now(),
            };
            observer.on_step_complete(&record, total).await;
            steps.push(record);

            if is_reflection {
                reflection = Some(output);
            } else {
                current = output;
            }
        }

        if cancel.is_cancelled() {
            return Err(PipelineError {
                kind: PipelineErrorKind::Cancelled,
                steps,
            });
        }

        Ok(PipelineOutput {
            output: current,
            reflection,
            steps,
        })
    }

    async fn call(
        &self,
        stage: &Stage,
        ctx: &StepContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, PipelineErrorKind> {
        let call = stage.executor.execute(ctx, input);
        let outcome = match self.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(PipelineErrorKind::TimedOut {
                        step: stage.name.clone(),
                        after: limit,
                    })
                }
            },
            None => call.await,
        };
        outcome.map_err(|failure| PipelineErrorKind::StepFailed {
            step: stage.name.clone(),
            message: failure.message,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
