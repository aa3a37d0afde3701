#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use atelier_api::auth::jwt::{JwtConfig, TokenAuthority};
use atelier_api::config::ServerConfig;
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;
use atelier_api::ws::WsManager;
use atelier_core::job_events::JobChannelMessage;
use atelier_core::types::{JobId, UserId};
use atelier_db::{MemoryJobStore, MemoryLedger};
use atelier_events::JobFeed;
use atelier_pipeline::backend::{Artifact, BackendError, GenerationBackend};
use atelier_pipeline::plan::StepInput;
use atelier_pipeline::{InProcessTrigger, JobSpawner, Worker, WorkerTrigger};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

pub const ALICE: UserId = 1;
pub const BOB: UserId = 2;

/// Build a test `ServerConfig` with safe defaults and a fixed JWT secret.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            issuer: "atelier".to_string(),
            access_token_expiry_mins: 15,
        },
        database_url: None,
        worker_url: None,
        backend_url: "http://localhost:8188".to_string(),
        backend_timeout_secs: 5,
        job_max_duration_secs: 900,
        sweep_interval_secs: 60,
        job_retention_hours: 24,
        ws_heartbeat_secs: 30,
        starting_balance: 0,
    }
}

pub fn token(user_id: UserId) -> String {
    TokenAuthority::new(&test_config().jwt)
        .issue(user_id)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Trigger that never starts a worker; jobs stay pending.
pub struct IdleTrigger;

impl WorkerTrigger for IdleTrigger {
    fn trigger(&self, _job_id: JobId) {}
}

/// Backend whose steps each wait for a permit.
pub struct GatedBackend {
    pub gate: Semaphore,
}

impl GatedBackend {
    pub fn open() -> Self {
        Self {
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
        }
    }

    pub fn closed() -> Self {
        Self {
            gate: Semaphore::new(0),
        }
    }

    pub fn release(&self, steps: usize) {
        self.gate.add_permits(steps);
    }
}

#[async_trait]
impl GenerationBackend for GatedBackend {
    async fn execute(&self, job_id: JobId, input: &StepInput) -> Result<Artifact, BackendError> {
        self.gate
            .acquire()
            .await
            .map_err(|e| BackendError::Rejected(e.to_string()))?
            .forget();
        Ok(Artifact {
            url: format!("https://cdn.example.com/{job_id}/{:?}.png", input.step),
        })
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryJobStore>,
    pub ledger: Arc<MemoryLedger>,
}

/// In-memory app whose jobs are never picked up by a worker.
pub fn build_test_app(starting_balance: i64) -> TestApp {
    build_app(starting_balance, |_, _| Arc::new(IdleTrigger))
}

/// In-memory app running jobs in-process against `backend`.
pub fn build_test_app_with_worker(
    starting_balance: i64,
    backend: Arc<dyn GenerationBackend>,
) -> TestApp {
    build_app(starting_balance, move |store, ledger| {
        let worker = Worker::new(store, ledger, backend);
        Arc::new(InProcessTrigger::new(Arc::new(worker)))
    })
}

fn build_app(
    starting_balance: i64,
    trigger: impl FnOnce(Arc<MemoryJobStore>, Arc<MemoryLedger>) -> Arc<dyn WorkerTrigger>,
) -> TestApp {
    let config = test_config();
    let feed = Arc::new(JobFeed::default());
    let store = Arc::new(MemoryJobStore::with_sink(feed.clone()));
    let ledger = Arc::new(MemoryLedger::with_starting_balance(starting_balance));
    let trigger = trigger(store.clone(), ledger.clone());
    let spawner = Arc::new(JobSpawner::new(store.clone(), ledger.clone(), trigger));

    let state = AppState {
        pool: None,
        store: store.clone(),
        ledger: ledger.clone(),
        feed,
        spawner,
        tokens: Arc::new(TokenAuthority::new(&config.jwt)),
        config: Arc::new(config.clone()),
        ws_manager: Arc::new(WsManager::new()),
    };

    TestApp {
        router: build_app_router(state.clone(), &config),
        state,
        store,
        ledger,
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &Router, uri: &str, user: Option<UserId>) -> Response {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("authorization", format!("Bearer {}", token(user)));
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    user: Option<UserId>,
    body: serde_json::Value,
) -> Response {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("authorization", format!("Bearer {}", token(user)));
    }
    app.clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn group_request(characters: usize) -> serde_json::Value {
    serde_json::json!({
        "type": "group_portrait",
        "prompt": "friends at a rooftop party",
        "characters": (0..characters)
            .map(|i| serde_json::json!({
                "name": format!("character-{i}"),
                "image_url": format!("https://cdn.example.com/ref-{i}.png"),
            }))
            .collect::<Vec<_>>(),
    })
}

pub async fn create_job(app: &Router, user: UserId, job_id: JobId, characters: usize) -> Response {
    post_json(
        app,
        "/api/v1/jobs",
        Some(user),
        serde_json::json!({ "job_id": job_id, "request": group_request(characters) }),
    )
    .await
}

pub async fn assert_status(response: Response, status: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}

// ---------------------------------------------------------------------------
// WebSocket helpers
// ---------------------------------------------------------------------------

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serve `router` on an ephemeral local port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub async fn connect(
    addr: SocketAddr,
    user: UserId,
    job_id: JobId,
) -> Result<Socket, tokio_tungstenite::tungstenite::Error> {
    let mut request = format!("ws://{addr}/api/v1/ws/jobs/{job_id}")
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", token(user)).parse().unwrap(),
    );
    let (socket, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(socket)
}

/// Next job message, or `None` once the server closed the socket.
pub async fn next_message(socket: &mut Socket) -> Option<JobChannelMessage> {
    let read = async {
        while let Some(frame) = socket.next().await {
            match frame.ok()? {
                Message::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), read)
        .await
        .expect("timed out waiting for a job message")
}

/// Read until the server closes the socket.
pub async fn drain(socket: &mut Socket) -> Vec<JobChannelMessage> {
    let mut messages = Vec::new();
    while let Some(message) = next_message(socket).await {
        messages.push(message);
    }
    messages
}
