//! Handlers for the `/jobs` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use lpe_core::job::{JobListQuery, SubmitJob};
use lpe_core::types::JobId;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a new job. Returns 201 with the created (pending) job; execution
/// happens in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJob>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    if !(input.input.is_object() || input.input.is_null()) {
        return Err(AppError::BadRequest("input must be a JSON object".into()));
    }

    let job_id = state.manager.enqueue(input.into_new_job()).await?;
    let job = state.manager.get(job_id).await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Newest first. Supports optional `status`, `limit`, and `offset` query
/// parameters.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.manager.list(&params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/stats
pub async fn job_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let stats = state.manager.stats().await?;
    Ok(Json(DataResponse { data: stats }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.manager.get(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a pending or running job. Returns 204 on success, 409 if the job
/// is already in a terminal state.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    state.manager.cancel(job_id).await?;
    tracing::info!(job_id = %job_id, "Job cancelled via API");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Resubmit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/resubmit
///
/// Create a new job from a failed or cancelled job's parameters. The new
/// job's `retryOf` points to the original. There is no automatic retry.
pub async fn resubmit_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let new_id = state.manager.resubmit(job_id).await?;
    let job = state.manager.get(new_id).await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}
