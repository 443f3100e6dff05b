//! Standard stage layouts per job kind.

use std::sync::Arc;
use std::time::Duration;

use lpe_core::error::CoreError;
use lpe_core::job::{Job, JobKind};

use crate::executor::StepExecutor;
use crate::pipeline::Pipeline;

/// Default number of question turns in a maieutic session.
pub const DEFAULT_MAIEUTIC_TURNS: u64 = 5;

/// Upper bound on maieutic question turns.
pub const MAX_MAIEUTIC_TURNS: u64 = 10;

/// Builds the pipeline that will run a job.
pub trait PipelineFactory: Send + Sync {
    fn build(&self, job: &Job) -> Result<Pipeline, CoreError>;
}

impl<F> PipelineFactory for F
where
    F: Fn(&Job) -> Result<Pipeline, CoreError> + Send + Sync,
{
    fn build(&self, job: &Job) -> Result<Pipeline, CoreError> {
        self(job)
    }
}

/// Supplies the executor for one stage of one job kind.
pub trait ExecutorFactory: Send + Sync {
    fn executor(&self, kind: JobKind, step_type: &str) -> Arc<dyn StepExecutor>;
}

/// A stage in a template: `(label, step type)`.
pub type StageTemplate = (String, &'static str);

/// Stage labels for a job kind: feed-forward stages and optional reflection.
///
/// Fails validation if the input asks for an unsupported number of
/// maieutic turns.
pub fn stage_templates(
    kind: JobKind,
    input: &serde_json::Value,
) -> Result<(Vec<StageTemplate>, Option<StageTemplate>), CoreError> {
    let t = |label: &str, step: &'static str| (label.to_string(), step);
    let layout = match kind {
        JobKind::Projection => (
            vec![
                t("Deconstructing narrative", "deconstruct"),
                t("Mapping to namespace", "map"),
                t("Reconstructing allegory", "reconstruct"),
                t("Applying style", "stylize"),
            ],
            Some(t("Generating reflection", "reflect")),
        ),
        JobKind::Translation => (
            vec![
                t("Forward translation", "forward_translate"),
                t("Backward translation", "backward_translate"),
            ],
            Some(t("Analyzing semantic drift", "analyze_drift")),
        ),
        JobKind::Maieutic => {
            let turns = maieutic_turns(input)?;
            let mut stages = vec![t("Starting dialogue session", "open_session")];
            stages.extend((1..=turns).map(|n| (format!("Generating question {n}"), "question")));
            (stages, None)
        }
        JobKind::ConfigGeneration => (
            vec![
                t("Generating attribute fields", "generate_fields"),
                t("Composing prompt", "compose_prompt"),
            ],
            None,
        ),
    };
    Ok(layout)
}

fn maieutic_turns(input: &serde_json::Value) -> Result<u64, CoreError> {
    match input.get("max_turns") {
        None | Some(serde_json::Value::Null) => Ok(DEFAULT_MAIEUTIC_TURNS),
        Some(value) => match value.as_u64() {
            Some(n) if (1..=MAX_MAIEUTIC_TURNS).contains(&n) => Ok(n),
            _ => Err(CoreError::Validation(format!(
                "max_turns must be an integer between 1 and {MAX_MAIEUTIC_TURNS}, got {value}"
            ))),
        },
    }
}

/// [`PipelineFactory`] resolving the standard templates against an
/// [`ExecutorFactory`].
pub struct PipelineCatalog {
    executors: Arc<dyn ExecutorFactory>,
    step_timeout: Option<Duration>,
}

impl PipelineCatalog {
    pub fn new(executors: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            executors,
            step_timeout: None,
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }
}

impl PipelineFactory for PipelineCatalog {
    fn build(&self, job: &Job) -> Result<Pipeline, CoreError> {
        let (stages, reflection) = stage_templates(job.kind, &job.input)?;

        let mut pipeline = Pipeline::new().for_kind(job.kind);
        for (label, step_type) in stages {
            let executor = self.executors.executor(job.kind, step_type);
            pipeline = pipeline.stage(label, step_type, executor);
        }
        if let Some((label, step_type)) = reflection {
            let executor = self.executors.executor(job.kind, step_type);
            pipeline = pipeline.reflect(label, step_type, executor);
        }
        if let Some(timeout) = self.step_timeout {
            pipeline = pipeline.with_step_timeout(timeout);
        }
        Ok(pipeline)
    }
}
