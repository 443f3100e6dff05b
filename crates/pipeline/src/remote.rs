//! HTTP client executing steps on an external transformation service.
//!
//! Each step is a `POST {base_url}/transform` with body
//! `{"jobId", "jobKind", "step", "position", "input"}`; the service answers
//! `{"output": ...}`.

use std::sync::Arc;

use async_trait::async_trait;
use lpe_core::job::JobKind;
use serde::Deserialize;

use crate::catalog::ExecutorFactory;
use crate::executor::{StepContext, StepExecutor, StepFailure};

/// Errors from the transformation service client.
#[derive(Debug, thiserror::Error)]
pub enum RemoteStepError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Transformation service error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Transformation service response has no output")]
    MissingOutput,

    #[error("Request cancelled")]
    Cancelled,
}

impl From<RemoteStepError> for StepFailure {
    fn from(err: RemoteStepError) -> Self {
        StepFailure::new(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TransformResponse {
    output: Option<serde_json::Value>,
}

/// [`StepExecutor`] calling the transformation service.
#[derive(Clone)]
pub struct RemoteStepExecutor {
    client: reqwest::Client,
    endpoint: String,
    kind: JobKind,
}

impl RemoteStepExecutor {
    /// * `base_url` - e.g. `http://localhost:8100`.
    pub fn new(client: reqwest::Client, base_url: &str, kind: JobKind) -> Self {
        Self {
            client,
            endpoint: format!("{}/transform", base_url.trim_end_matches('/')),
            kind,
        }
    }

    /// Perform one step call, aborting early if the job is cancelled.
    pub async fn transform(
        &self,
        ctx: &StepContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, RemoteStepError> {
        let body = serde_json::json!({
            "jobId": ctx.job_id,
            "jobKind": self.kind,
            "step": ctx.step_type,
            "position": ctx.position,
            "input": input,
        });

        let request = self.client.post(&self.endpoint).json(&body).send();
        let response = tokio::select! {
            response = request => response?,
            () = ctx.cancel.cancelled() => return Err(RemoteStepError::Cancelled),
        };

        let response = Self::ensure_success(response).await?;
        let parsed: TransformResponse = response.json().await?;
        parsed.output.ok_or(RemoteStepError::MissingOutput)
    }

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RemoteStepError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RemoteStepError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl StepExecutor for RemoteStepExecutor {
    async fn execute(
        &self,
        ctx: &StepContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, StepFailure> {
        self.transform(ctx, input).await.map_err(|e| {
            tracing::warn!(job_id = %ctx.job_id, step = %ctx.step_name, error = %e, "Remote step failed");
            StepFailure::from(e)
        })
    }
}

/// [`ExecutorFactory`] handing out [`RemoteStepExecutor`]s that share one
/// connection pool.
pub struct RemoteExecutorFactory {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteExecutorFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl ExecutorFactory for RemoteExecutorFactory {
    fn executor(&self, kind: JobKind, _step_type: &str) -> Arc<dyn StepExecutor> {
        Arc::new(RemoteStepExecutor::new(self.client.clone(), &self.base_url, kind))
    }
}
