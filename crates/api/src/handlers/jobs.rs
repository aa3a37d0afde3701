//! Handlers for the `/jobs` resource.
//!
//! All endpoints require authentication via [`AuthUser`]. Users only see
//! and cancel their own jobs.

use atelier_core::error::CoreError;
use atelier_core::job::Job;
use atelier_core::request::GenerationRequest;
use atelier_core::store::JobStore;
use atelier_core::types::JobId;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /api/v1/jobs`.
///
/// `job_id` is minted by the caller, who subscribes to it before creating
/// the job.
#[derive(Debug, Deserialize)]
pub struct CreateJob {
    pub job_id: JobId,
    pub request: GenerationRequest,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a job and verify the caller owns it.
///
/// `action` is used in the error message (e.g. "view", "cancel").
pub(crate) async fn find_and_authorize(
    store: &dyn JobStore,
    job_id: JobId,
    auth: &AuthUser,
    action: &str,
) -> AppResult<Job> {
    let job = store
        .get(job_id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })
        })?;

    if job.owner != auth.user_id {
        return Err(AppError::Core(CoreError::Forbidden(format!(
            "Cannot {action} another user's job"
        ))));
    }

    Ok(job)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Charge the caller and start the job. Returns 201 with
/// `{ job_id, cost, new_balance }`; the worker runs detached.
pub async fn create_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateJob>,
) -> AppResult<impl IntoResponse> {
    let receipt = state
        .spawner
        .spawn(auth.user_id, input.job_id, input.request)
        .await?;

    Ok((StatusCode::CREATED, Json(DataResponse { data: receipt })))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{job_id}
///
/// Current status of one job, for callers whose subscription was lost.
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(state.store.as_ref(), job_id, &auth, "view").await?;
    Ok(Json(DataResponse { data: job.view() }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{job_id}/cancel
///
/// Ask the worker to stop. Returns 202 with the job in
/// `cancellation_requested`; the worker fails and refunds it at its next
/// step boundary. 409 if the job already finished.
pub async fn cancel_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(state.store.as_ref(), job_id, &auth, "cancel").await?;
    if job.is_terminal() {
        return Err(terminal_conflict(&job));
    }

    let Some(job) = state.store.request_cancellation(job_id).await? else {
        // Finished between the read and the write.
        return Err(AppError::Core(CoreError::Conflict(format!(
            "Job {job_id} already finished and cannot be cancelled"
        ))));
    };

    tracing::info!(job_id = %job_id, user_id = auth.user_id, "Job cancellation requested");
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job.view() })))
}

fn terminal_conflict(job: &Job) -> AppError {
    AppError::Core(CoreError::Conflict(format!(
        "Job {} already {} and cannot be cancelled",
        job.job_id, job.status
    )))
}
