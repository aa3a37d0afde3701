use std::net::SocketAddr;
use std::sync::Arc;

use atelier_db::{PgJobStore, PgLedger};
use atelier_pipeline::{HttpBackend, Worker};
use atelier_worker::config::WorkerConfig;
use atelier_worker::routes::build_router;
use atelier_worker::state::WorkerState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier_worker=debug,atelier_pipeline=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(host = %config.host, port = config.port, backend_url = %config.backend_url, "Loaded worker configuration");

    // --- Database ---
    let pool = atelier_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    atelier_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database connection pool created");

    // --- Worker ---
    let backend = HttpBackend::new(config.backend_url.clone(), config.backend_timeout())
        .expect("Failed to build generation backend client");
    let worker = Arc::new(Worker::new(
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(PgLedger::new(pool)),
        Arc::new(backend),
    ));
    let state = WorkerState::new(worker);
    let runs = state.runs.clone();

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid WORKER_HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting worker service");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Drain in-flight runs ---
    runs.close();
    let in_flight = runs.len();
    tracing::info!(in_flight, "Waiting for in-flight job runs");
    if tokio::time::timeout(config.shutdown_timeout(), runs.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            remaining = runs.len(),
            "Shutdown timeout elapsed; unfinished jobs will be failed and refunded by the sweep"
        );
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
