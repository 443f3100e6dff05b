//! The step executor seam.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use lpe_core::job::JobKind;
use lpe_core::types::JobId;
use tokio_util::sync::CancellationToken;

/// What an executor knows about the step it is running.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_id: JobId,
    pub job_kind: Option<JobKind>,
    /// Human-readable label, e.g. `"Mapping to namespace"`.
    pub step_name: String,
    /// Machine name of the transformation, e.g. `"map"`.
    pub step_type: String,
    pub position: u32,
    /// Cancelled when the job is cancelled. Long-running executors may
    /// watch it; the pipeline itself only checks it between steps.
    pub cancel: CancellationToken,
}

/// A step executor reported failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StepFailure {
    pub message: String,
}

impl StepFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One transformation capability: JSON in, JSON out.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &StepContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, StepFailure>;
}

/// Adapter turning an async closure into a [`StepExecutor`].
struct FnExecutor<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> StepExecutor for FnExecutor<F>
where
    F: Fn(StepContext, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, StepFailure>> + Send,
{
    async fn execute(
        &self,
        ctx: &StepContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, StepFailure> {
        (self.f)(ctx.clone(), input).await
    }
}

/// Wrap an async closure as a shareable executor.
///
/// ```rust
/// use lpe_pipeline::{step_fn, StepFailure};
///
/// let upper = step_fn(|_ctx, input| async move {
///     let text = input.as_str().ok_or_else(|| StepFailure::new("expected text"))?;
///     Ok(serde_json::Value::String(text.to_uppercase()))
/// });
/// ```
pub fn step_fn<F, Fut>(f: F) -> Arc<dyn StepExecutor>
where
    F: Fn(StepContext, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, StepFailure>> + Send + 'static,
{
    Arc::new(FnExecutor { f })
}
