//! `POST /run` and `GET /health` against an in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use atelier_core::job::{JobStatus, NewJob};
use atelier_core::ledger::BalanceLedger;
use atelier_core::request::GenerationRequest;
use atelier_core::store::JobStore;
use atelier_core::types::JobId;
use atelier_db::{MemoryJobStore, MemoryLedger};
use atelier_pipeline::backend::{Artifact, BackendError, GenerationBackend};
use atelier_pipeline::plan::StepInput;
use atelier_pipeline::Worker;
use atelier_worker::routes::build_router;
use atelier_worker::state::WorkerState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

const OWNER: i64 = 7;

/// Backend that always succeeds.
struct EchoBackend;

#[async_trait]
impl GenerationBackend for EchoBackend {
    async fn execute(&self, job_id: JobId, input: &StepInput) -> Result<Artifact, BackendError> {
        Ok(Artifact {
            url: format!("https://cdn.example.com/{job_id}/{:?}.png", input.step),
        })
    }
}

struct Fixture {
    store: Arc<MemoryJobStore>,
    ledger: Arc<MemoryLedger>,
    state: WorkerState,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryJobStore::new());
    let ledger = Arc::new(MemoryLedger::with_starting_balance(10));
    let worker = Worker::new(store.clone(), ledger.clone(), Arc::new(EchoBackend));
    Fixture {
        store,
        ledger,
        state: WorkerState::new(Arc::new(worker)),
    }
}

async fn create_pending(fixture: &Fixture) -> JobId {
    let job_id = JobId::new();
    let request = GenerationRequest::FaceRestore {
        image_url: "https://cdn.example.com/face.png".into(),
    };
    let cost = request.cost();
    fixture.ledger.debit(OWNER, job_id, cost).await.unwrap();
    fixture
        .store
        .create(NewJob {
            job_id,
            owner: OWNER,
            cost,
            request,
        })
        .await
        .unwrap();
    job_id
}

fn post_run(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/run")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn run_is_accepted_and_completes_detached() {
    let fixture = fixture();
    let job_id = create_pending(&fixture).await;
    let app = build_router(fixture.state.clone());

    let response = app
        .oneshot(post_run(serde_json::json!({ "job_id": job_id }).to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["job_id"], job_id.to_string());

    fixture.state.runs.close();
    fixture.state.runs.wait().await;

    let job = fixture.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.result.is_some());
    assert_eq!(fixture.ledger.balance(OWNER).await.unwrap(), 9);
}

#[tokio::test]
async fn unknown_job_is_accepted_and_skipped() {
    let fixture = fixture();
    let app = build_router(fixture.state.clone());
    let job_id = JobId::new();

    let response = app
        .oneshot(post_run(serde_json::json!({ "job_id": job_id }).to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    fixture.state.runs.close();
    fixture.state.runs.wait().await;
    assert!(fixture.store.is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let fixture = fixture();
    let app = build_router(fixture.state.clone());

    let response = app
        .oneshot(post_run(r#"{"job_id":"not-a-uuid"}"#.to_string()))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert!(fixture.state.runs.is_empty());
}

#[tokio::test]
async fn health_reports_ok() {
    let fixture = fixture();
    let app = build_router(fixture.state.clone());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["running"], 0);
}
