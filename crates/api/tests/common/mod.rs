#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use lpe_core::error::CoreError;
use lpe_core::job::Job;
use lpe_db::MemoryJobStore;
use lpe_events::{EventBus, NotificationHub};
use lpe_pipeline::{step_fn, Pipeline, StepFailure};
use lpe_worker::{JobManager, WorkerConfig};
use serde_json::Value;
use tower::ServiceExt;

use lpe_api::config::ServerConfig;
use lpe_api::router::build_app_router;
use lpe_api::state::AppState;
use lpe_api::ws::WsManager;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 1,
    }
}

/// Job manager over an in-memory store whose pipelines echo their input
/// through one step, or fail when the input carries `"fail": true`.
pub fn test_manager() -> Arc<JobManager> {
    let pipelines = |job: &Job| -> Result<Pipeline, CoreError> {
        let step = step_fn(|_ctx, input: Value| async move {
            if input.get("fail").and_then(Value::as_bool) == Some(true) {
                Err(StepFailure::new("requested failure"))
            } else {
                Ok(input)
            }
        });
        Ok(Pipeline::new().for_kind(job.kind).stage("Echo", "echo", step))
    };
    JobManager::new(
        Arc::new(MemoryJobStore::new()),
        Arc::new(NotificationHub::new()),
        Arc::new(EventBus::default()),
        Arc::new(pipelines),
        WorkerConfig::default(),
    )
}

pub fn test_state(manager: Arc<JobManager>) -> AppState {
    AppState {
        manager,
        config: Arc::new(test_config()),
        ws_manager: Arc::new(WsManager::new()),
    }
}

/// Build the full application router with all middleware layers.
pub fn build_test_app(manager: Arc<JobManager>) -> Router {
    build_app_router(test_state(manager), &test_config())
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll until job `id` reaches `status`. Panics after five seconds.
pub async fn wait_for_status(
    manager: &JobManager,
    id: lpe_core::types::JobId,
    status: lpe_core::job::JobStatus,
) -> Job {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let job = manager.get(id).await.unwrap();
        if job.status == status {
            return job;
        }
        assert!(tokio::time::Instant::now() < deadline, "job {id} stuck in {}", job.status);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
