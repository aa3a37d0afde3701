//! HTTP surface of the worker service.
//!
//! ```text
//! GET    /health  -> health_check
//! POST   /run     -> run_job
//! ```

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use atelier_core::types::JobId;
use atelier_pipeline::trigger::RunRequest;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::state::WorkerState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Job runs currently in flight.
    pub running: usize,
}

#[derive(Serialize)]
pub struct RunAccepted {
    pub job_id: JobId,
}

#[derive(Serialize)]
struct DataResponse<T: Serialize> {
    data: T,
}

/// GET /health
async fn health_check(State(state): State<WorkerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        running: state.runs.len(),
    })
}

/// POST /run
///
/// Accepts the trigger and returns 202 immediately; the job runs on a
/// detached task.
async fn run_job(
    State(state): State<WorkerState>,
    Json(input): Json<RunRequest>,
) -> (StatusCode, Json<DataResponse<RunAccepted>>) {
    let job_id = input.job_id;
    let worker = Arc::clone(&state.worker);
    state.runs.spawn(async move {
        let outcome = worker.run(job_id).await;
        tracing::info!(job_id = %job_id, outcome = ?outcome, "Job run finished");
    });
    tracing::info!(job_id = %job_id, "Job run accepted");

    (
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: RunAccepted { job_id },
        }),
    )
}

/// Build the worker service router.
pub fn build_router(state: WorkerState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/run", post(run_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
