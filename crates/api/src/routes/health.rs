use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when Postgres is configured but unreachable.
    pub status: &'static str,
    pub version: &'static str,
    /// `postgres` or `memory`.
    pub storage: &'static str,
    /// `None` when running without a database.
    pub db_healthy: Option<bool>,
    pub ws_connections: usize,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (storage, db_healthy) = match &state.pool {
        Some(pool) => ("postgres", Some(atelier_db::health_check(pool).await.is_ok())),
        None => ("memory", None),
    };

    Json(HealthResponse {
        status: match db_healthy {
            Some(false) => "degraded",
            _ => "ok",
        },
        version: env!("CARGO_PKG_VERSION"),
        storage,
        db_healthy,
        ws_connections: state.ws_manager.connection_count().await,
    })
}

/// Mounted at the root so probes skip auth and the `/api/v1` prefix.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
