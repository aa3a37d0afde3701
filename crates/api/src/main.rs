use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use atelier_api::auth::jwt::TokenAuthority;
use atelier_api::config::ServerConfig;
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;
use atelier_api::{background, ws};
use atelier_core::ledger::BalanceLedger;
use atelier_core::store::JobStore;
use atelier_db::{DbPool, MemoryJobStore, MemoryLedger, PgJobStore, PgLedger};
use atelier_events::JobFeed;
use atelier_pipeline::{HttpBackend, HttpTrigger, InProcessTrigger, JobSpawner, Worker, WorkerTrigger};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Timeout for delivering a trigger to the worker service.
const WORKER_TRIGGER_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier_api=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let cancel = CancellationToken::new();
    let feed = Arc::new(JobFeed::default());

    // --- Store and ledger ---
    let (pool, store, ledger, relay_handle) = match &config.database_url {
        Some(database_url) => {
            let pool = connect_database(database_url).await;
            let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
            let ledger: Arc<dyn BalanceLedger> = Arc::new(PgLedger::new(pool.clone()));

            let relay = tokio::spawn(atelier_events::pg_relay::run(
                pool.clone(),
                Arc::clone(&feed),
                cancel.clone(),
            ));
            (Some(pool), store, ledger, Some(relay))
        }
        None => {
            tracing::warn!(
                starting_balance = config.starting_balance,
                "DATABASE_URL not set, using the in-memory job store and ledger"
            );
            let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::with_sink(feed.clone()));
            let ledger: Arc<dyn BalanceLedger> =
                Arc::new(MemoryLedger::with_starting_balance(config.starting_balance));
            (None, store, ledger, None)
        }
    };

    // --- Worker trigger ---
    let trigger = build_trigger(&config, pool.is_some(), &store, &ledger);
    let spawner = Arc::new(JobSpawner::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        trigger,
    ));

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager), config.ws_heartbeat());

    // --- Background tasks ---
    let reconciliation_handle = tokio::spawn(background::job_reconciliation::run(
        Arc::clone(&store),
        Arc::clone(&ledger),
        config.job_max_duration(),
        config.sweep_interval(),
        cancel.clone(),
    ));
    let retention_handle = tokio::spawn(background::job_retention::run(
        Arc::clone(&store),
        config.job_retention(),
        config.sweep_interval(),
        cancel.clone(),
    ));
    tracing::info!("Background tasks started (reconciliation, retention)");

    // --- App state ---
    let state = AppState {
        pool,
        store,
        ledger,
        feed,
        spawner,
        tokens: Arc::new(TokenAuthority::new(&config.jwt)),
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    cancel.cancel();
    let _ = tokio::time::timeout(grace, reconciliation_handle).await;
    let _ = tokio::time::timeout(grace, retention_handle).await;
    if let Some(relay) = relay_handle {
        match tokio::time::timeout(grace, relay).await {
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "Job change relay failed"),
            Ok(_) => {}
            Err(_) => tracing::warn!("Job change relay did not stop in time"),
        }
    }
    tracing::info!("Background tasks stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

async fn connect_database(database_url: &str) -> DbPool {
    let pool = atelier_db::create_pool(database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    atelier_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    atelier_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    pool
}

/// Pick how spawned jobs reach a worker.
///
/// An out-of-process worker needs the shared database, so `WORKER_URL` is
/// ignored in in-memory mode.
fn build_trigger(
    config: &ServerConfig,
    shared_store: bool,
    store: &Arc<dyn JobStore>,
    ledger: &Arc<dyn BalanceLedger>,
) -> Arc<dyn WorkerTrigger> {
    match &config.worker_url {
        Some(worker_url) if shared_store => {
            tracing::info!(worker_url = %worker_url, "Dispatching jobs to the worker service");
            Arc::new(
                HttpTrigger::new(worker_url.clone(), WORKER_TRIGGER_TIMEOUT)
                    .expect("Failed to build worker trigger client"),
            )
        }
        worker_url => {
            if worker_url.is_some() {
                tracing::warn!("WORKER_URL ignored without DATABASE_URL, running workers in-process");
            }
            tracing::info!(backend_url = %config.backend_url, "Running workers in-process");
            let backend = HttpBackend::new(config.backend_url.clone(), config.backend_timeout())
                .expect("Failed to build generation backend client");
            let worker = Worker::new(Arc::clone(store), Arc::clone(ledger), Arc::new(backend));
            Arc::new(InProcessTrigger::new(Arc::new(worker)))
        }
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
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
