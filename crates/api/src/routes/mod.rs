pub mod health;
pub mod jobs;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws/jobs/{job_id}          per-job progress subscription (WebSocket)
///
/// /jobs                      create
/// /jobs/{job_id}             get
/// /jobs/{job_id}/cancel      request cancellation (POST)
///
/// /balance                   caller's credit balance
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/jobs/{job_id}", get(ws::job_ws_handler))
        .nest("/jobs", jobs::router())
        .route("/balance", get(handlers::balance::get_balance))
}
