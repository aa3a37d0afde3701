//! In-process stand-ins for the API server used by the client tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atelier_client::reconnect::ReconnectConfig;
use atelier_client::{
    ApiClientError, ChannelError, ClientConfig, CreatedJob, JobChannel, JobConnector, JobsApi,
    ProgressSubscriber,
};
use atelier_core::job::{JobStatus, JobView};
use atelier_core::job_events::JobChannelMessage;
use atelier_core::progress::Progress;
use atelier_core::request::{AspectRatio, CharacterRef, GenerationRequest};
use atelier_core::store::JobStore;
use atelier_core::types::{JobId, UserId};
use atelier_db::{MemoryJobStore, MemoryLedger};
use atelier_events::{JobFeed, JobSubscription};
use atelier_pipeline::plan::StepInput;
use atelier_pipeline::{
    Artifact, BackendError, GenerationBackend, InProcessTrigger, JobSpawner, SpawnError, Worker,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, Semaphore};

pub const OWNER: UserId = 1;

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("http://atelier.test", "token");
    config.ack_timeout = Duration::from_secs(2);
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        max_attempts: 3,
    };
    config
}

pub fn group_request(characters: usize) -> GenerationRequest {
    GenerationRequest::GroupPortrait {
        characters: (0..characters)
            .map(|i| CharacterRef {
                name: format!("character-{i}"),
                image_url: format!("https://cdn.example.com/ref-{i}.png"),
                pose: None,
            })
            .collect(),
        prompt: "three friends on a rooftop at dusk".into(),
        style: None,
        aspect_ratio: AspectRatio::Square,
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend whose steps each need a permit, optionally failing one call.
pub struct TestBackend {
    gate: Semaphore,
    fail_at: Option<usize>,
    calls: AtomicUsize,
}

impl TestBackend {
    pub fn open() -> Self {
        Self::build(Semaphore::MAX_PERMITS, None)
    }

    pub fn closed() -> Self {
        Self::build(0, None)
    }

    pub fn failing_at(call: usize) -> Self {
        Self::build(Semaphore::MAX_PERMITS, Some(call))
    }

    fn build(permits: usize, fail_at: Option<usize>) -> Self {
        Self {
            gate: Semaphore::new(permits),
            fail_at,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, steps: usize) {
        self.gate.add_permits(steps);
    }
}

#[async_trait]
impl GenerationBackend for TestBackend {
    async fn execute(&self, job_id: JobId, input: &StepInput) -> Result<Artifact, BackendError> {
        self.gate
            .acquire()
            .await
            .map_err(|e| BackendError::Rejected(e.to_string()))?
            .forget();

        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(index) {
            return Err(BackendError::Api {
                status: 500,
                body: "gpu fell over".into(),
            });
        }
        Ok(Artifact {
            url: format!("https://cdn.example.com/{job_id}/{:?}.png", input.step),
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory server
// ---------------------------------------------------------------------------

/// Serves subscriptions straight from a [`JobFeed`], the way the API's
/// WebSocket handler does: ack first, then the stored snapshot, then
/// changes until a terminal one.
pub struct FeedConnector {
    feed: Arc<JobFeed>,
    store: Arc<MemoryJobStore>,
}

#[async_trait]
impl JobConnector for FeedConnector {
    async fn open(&self, job_id: JobId) -> Result<Box<dyn JobChannel>, ChannelError> {
        let subscription = self.feed.subscribe(job_id);
        let mut pending = VecDeque::from([JobChannelMessage::Subscribed { job_id }]);
        if let Some(job) = self
            .store
            .get(job_id)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?
        {
            pending.push_back(JobChannelMessage::Update { job: job.view() });
        }
        Ok(Box::new(FeedChannel {
            subscription,
            pending,
            done: false,
        }))
    }
}

struct FeedChannel {
    subscription: JobSubscription,
    pending: VecDeque<JobChannelMessage>,
    done: bool,
}

#[async_trait]
impl JobChannel for FeedChannel {
    async fn next_message(&mut self) -> Result<Option<JobChannelMessage>, ChannelError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        if self.done {
            return Ok(None);
        }
        loop {
            match self.subscription.recv().await {
                Ok(change) => {
                    let message = JobChannelMessage::from(&change);
                    self.done = message.is_terminal();
                    return Ok(Some(message));
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        self.done = true;
    }
}

/// [`JobsApi`] calling the spawner and store directly.
pub struct SpawnerApi {
    spawner: JobSpawner,
    store: Arc<MemoryJobStore>,
}

fn api_error(status: u16, code: &str, message: impl ToString) -> ApiClientError {
    ApiClientError::Api {
        status,
        code: code.to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl JobsApi for SpawnerApi {
    async fn create_job(
        &self,
        job_id: JobId,
        request: &GenerationRequest,
    ) -> Result<CreatedJob, ApiClientError> {
        match self.spawner.spawn(OWNER, job_id, request.clone()).await {
            Ok(receipt) => Ok(CreatedJob {
                job_id: receipt.job_id,
                cost: receipt.cost,
                new_balance: receipt.new_balance,
            }),
            Err(e @ SpawnError::InsufficientBalance { .. }) => {
                Err(api_error(402, "INSUFFICIENT_BALANCE", e))
            }
            Err(e @ SpawnError::Invalid(_)) => Err(api_error(400, "BAD_REQUEST", e)),
            Err(e @ SpawnError::Duplicate(_)) => Err(api_error(409, "DUPLICATE_JOB", e)),
            Err(e) => Err(api_error(500, "INTERNAL_ERROR", e)),
        }
    }

    async fn request_cancellation(&self, job_id: JobId) -> Result<JobView, ApiClientError> {
        match self.store.request_cancellation(job_id).await {
            Ok(Some(job)) => Ok(job.view()),
            Ok(None) => Err(api_error(409, "CONFLICT", "job already finished")),
            Err(e) => Err(api_error(404, "NOT_FOUND", e)),
        }
    }

    async fn job_status(&self, job_id: JobId) -> Result<JobView, ApiClientError> {
        match self.store.get(job_id).await {
            Ok(Some(job)) => Ok(job.view()),
            Ok(None) => Err(api_error(404, "NOT_FOUND", "job not found")),
            Err(e) => Err(api_error(500, "INTERNAL_ERROR", e)),
        }
    }
}

/// Store, ledger, worker and a subscriber wired to them.
pub struct World {
    pub feed: Arc<JobFeed>,
    pub store: Arc<MemoryJobStore>,
    pub ledger: Arc<MemoryLedger>,
    pub backend: Arc<TestBackend>,
    pub subscriber: Arc<ProgressSubscriber>,
}

impl World {
    pub fn new(starting_balance: i64, backend: TestBackend) -> Self {
        let feed = Arc::new(JobFeed::default());
        let store = Arc::new(MemoryJobStore::with_sink(feed.clone()));
        let ledger = Arc::new(MemoryLedger::with_starting_balance(starting_balance));
        let backend = Arc::new(backend);

        let worker = Arc::new(Worker::new(store.clone(), ledger.clone(), backend.clone()));
        let spawner = JobSpawner::new(
            store.clone(),
            ledger.clone(),
            Arc::new(InProcessTrigger::new(worker)),
        );
        let connector = Arc::new(FeedConnector {
            feed: feed.clone(),
            store: store.clone(),
        });
        let api = Arc::new(SpawnerApi {
            spawner,
            store: store.clone(),
        });
        let subscriber = Arc::new(ProgressSubscriber::new(connector, api, &test_config()));

        Self {
            feed,
            store,
            ledger,
            backend,
            subscriber,
        }
    }

    /// Wait until the worker has finished `job_id`, whoever was watching.
    pub async fn settled(&self, job_id: JobId) -> JobStatus {
        for _ in 0..500 {
            if let Some(job) = self.store.get(job_id).await.unwrap() {
                if job.is_terminal() {
                    return job.status;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never finished");
    }

    /// Wait until the charge for `job_id` has been refunded.
    pub async fn refunded(&self, job_id: JobId) {
        for _ in 0..500 {
            if self.ledger.is_refunded(job_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} was never refunded");
    }
}

// ---------------------------------------------------------------------------
// Scripted server
// ---------------------------------------------------------------------------

pub type Item = Result<JobChannelMessage, ChannelError>;

/// Hands out one scripted channel per `open`. A channel that runs out of
/// script signals `drained` and then waits forever.
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<Vec<Item>>>,
    opens: AtomicUsize,
    pub drained: Arc<Notify>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Vec<Item>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            opens: AtomicUsize::new(0),
            drained: Arc::new(Notify::new()),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobConnector for ScriptedConnector {
    async fn open(&self, _job_id: JobId) -> Result<Box<dyn JobChannel>, ChannelError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChannelError::Connect("connection refused".into()))?;
        Ok(Box::new(ScriptedChannel {
            script: script.into(),
            drained: self.drained.clone(),
        }))
    }
}

struct ScriptedChannel {
    script: VecDeque<Item>,
    drained: Arc<Notify>,
}

#[async_trait]
impl JobChannel for ScriptedChannel {
    async fn next_message(&mut self) -> Result<Option<JobChannelMessage>, ChannelError> {
        match self.script.pop_front() {
            Some(item) => item.map(Some),
            None => {
                self.drained.notify_one();
                std::future::pending().await
            }
        }
    }

    async fn close(&mut self) {}
}

/// API that accepts every job without running it.
#[derive(Default)]
pub struct ScriptedApi {
    pub created: Mutex<Vec<JobId>>,
}

impl ScriptedApi {
    pub fn created(&self) -> Vec<JobId> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobsApi for ScriptedApi {
    async fn create_job(
        &self,
        job_id: JobId,
        _request: &GenerationRequest,
    ) -> Result<CreatedJob, ApiClientError> {
        self.created.lock().unwrap().push(job_id);
        Ok(CreatedJob {
            job_id,
            cost: 4,
            new_balance: 6,
        })
    }

    async fn request_cancellation(&self, _job_id: JobId) -> Result<JobView, ApiClientError> {
        Err(api_error(404, "NOT_FOUND", "job not found"))
    }

    async fn job_status(&self, _job_id: JobId) -> Result<JobView, ApiClientError> {
        Err(api_error(404, "NOT_FOUND", "job not found"))
    }
}

/// A real transport failure: the request never leaves the client.
pub async fn transport_error() -> ApiClientError {
    reqwest::Client::new()
        .get("not a url")
        .send()
        .await
        .unwrap_err()
        .into()
}

/// API whose create requests fail in transit. With `lands` set the job is
/// created anyway, as when the response is lost after the server commits.
pub struct UnconfirmedApi {
    lands: bool,
    created: Mutex<Vec<JobId>>,
}

impl UnconfirmedApi {
    pub fn landing() -> Self {
        Self {
            lands: true,
            created: Mutex::default(),
        }
    }

    pub fn lost() -> Self {
        Self {
            lands: false,
            created: Mutex::default(),
        }
    }

    pub fn created(&self) -> Vec<JobId> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobsApi for UnconfirmedApi {
    async fn create_job(
        &self,
        job_id: JobId,
        _request: &GenerationRequest,
    ) -> Result<CreatedJob, ApiClientError> {
        if self.lands {
            self.created.lock().unwrap().push(job_id);
        }
        Err(transport_error().await)
    }

    async fn request_cancellation(&self, _job_id: JobId) -> Result<JobView, ApiClientError> {
        Err(api_error(404, "NOT_FOUND", "job not found"))
    }

    async fn job_status(&self, job_id: JobId) -> Result<JobView, ApiClientError> {
        if self.created.lock().unwrap().contains(&job_id) {
            Ok(view(job_id, JobStatus::Running))
        } else {
            Err(api_error(404, "NOT_FOUND", "job not found"))
        }
    }
}

pub fn ack(job_id: JobId) -> Item {
    Ok(JobChannelMessage::Subscribed { job_id })
}

pub fn progress(job_id: JobId, progress: Progress) -> Item {
    let mut job = view(job_id, JobStatus::Running);
    job.percent = progress.percent();
    job.progress_message = Some(progress.to_string());
    job.progress = Some(progress);
    Ok(JobChannelMessage::Update { job })
}

pub fn finished(job_id: JobId, result: &str) -> Item {
    let mut job = view(job_id, JobStatus::Succeeded);
    job.percent = 100;
    job.result = Some(result.to_string());
    Ok(JobChannelMessage::Update { job })
}

fn view(job_id: JobId, status: JobStatus) -> JobView {
    JobView {
        job_id,
        status,
        cost: 4,
        progress: None,
        progress_message: None,
        percent: 0,
        result: None,
        failure_kind: None,
        failure_message: None,
        updated_at: chrono::Utc::now(),
    }
}
