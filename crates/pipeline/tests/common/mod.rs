//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use atelier_core::job_events::JobChange;
use atelier_core::request::{AspectRatio, CharacterRef, GenerationRequest};
use atelier_core::store::JobStore;
use atelier_core::types::{JobId, UserId};
use atelier_db::{MemoryJobStore, MemoryLedger};
use atelier_events::{JobFeed, JobSubscription};
use atelier_pipeline::backend::{Artifact, BackendError, GenerationBackend};
use atelier_pipeline::plan::StepInput;
use atelier_pipeline::{reconcile_stale, JobSpawner, Worker, WorkerTrigger};

pub const OWNER: UserId = 1;

/// What the scripted backend does on a given call.
#[derive(Debug, Clone, Copy)]
pub enum Action {
    Fail,
    /// Flag the job for cancellation, then succeed.
    Cancel,
    /// Run the reconciliation sweep over every active job, then succeed.
    Sweep,
}

/// Backend that succeeds unless the call index is scripted otherwise.
pub struct ScriptedBackend {
    script: HashMap<usize, Action>,
    calls: Mutex<Vec<StepInput>>,
    store: Arc<MemoryJobStore>,
    ledger: Arc<MemoryLedger>,
}

impl ScriptedBackend {
    pub fn calls(&self) -> Vec<StepInput> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn execute(&self, job_id: JobId, input: &StepInput) -> Result<Artifact, BackendError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(input.clone());
            calls.len() - 1
        };

        match self.script.get(&index) {
            Some(Action::Fail) => {
                return Err(BackendError::Api {
                    status: 500,
                    body: "gpu fell over".into(),
                })
            }
            Some(Action::Cancel) => {
                self.store.request_cancellation(job_id).await.unwrap();
            }
            Some(Action::Sweep) => {
                let cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
                reconcile_stale(self.store.as_ref(), self.ledger.as_ref(), cutoff)
                    .await
                    .unwrap();
            }
            None => {}
        }

        Ok(Artifact {
            url: format!("https://cdn.example.com/{job_id}/{index}.png"),
        })
    }
}

/// Trigger that only records job ids; tests run the worker themselves.
#[derive(Default)]
pub struct RecordingTrigger(Mutex<Vec<JobId>>);

impl RecordingTrigger {
    pub fn triggered(&self) -> Vec<JobId> {
        self.0.lock().unwrap().clone()
    }
}

impl WorkerTrigger for RecordingTrigger {
    fn trigger(&self, job_id: JobId) {
        self.0.lock().unwrap().push(job_id);
    }
}

pub struct Harness {
    pub feed: Arc<JobFeed>,
    pub store: Arc<MemoryJobStore>,
    pub ledger: Arc<MemoryLedger>,
    pub backend: Arc<ScriptedBackend>,
    pub trigger: Arc<RecordingTrigger>,
    pub spawner: JobSpawner,
    pub worker: Worker,
}

impl Harness {
    pub fn new(starting_balance: i64, script: &[(usize, Action)]) -> Self {
        let feed = Arc::new(JobFeed::default());
        let store = Arc::new(MemoryJobStore::with_sink(feed.clone()));
        let ledger = Arc::new(MemoryLedger::with_starting_balance(starting_balance));
        let backend = Arc::new(ScriptedBackend {
            script: script.iter().copied().collect(),
            calls: Mutex::new(Vec::new()),
            store: store.clone(),
            ledger: ledger.clone(),
        });
        let trigger = Arc::new(RecordingTrigger::default());
        let spawner = JobSpawner::new(store.clone(), ledger.clone(), trigger.clone());
        let worker = Worker::new(store.clone(), ledger.clone(), backend.clone());

        Self {
            feed,
            store,
            ledger,
            backend,
            trigger,
            spawner,
            worker,
        }
    }
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
        style: Some("watercolor".into()),
        aspect_ratio: AspectRatio::Wide,
    }
}

/// Drain a subscription until the feed closes it, rendering each change
/// as the progress message, the result, or `"<status>"`.
pub async fn drain(mut subscription: JobSubscription) -> Vec<String> {
    let mut seen = Vec::new();
    while let Ok(change) = subscription.recv().await {
        seen.push(match change {
            JobChange::Updated(job) => match (&job.result, &job.progress_message) {
                (Some(result), _) => format!("result:{result}"),
                _ if job.is_terminal() => format!("<{}>", job.status),
                (None, Some(message)) => message.clone(),
                (None, None) => format!("<{}>", job.status),
            },
            JobChange::Deleted { .. } => "<deleted>".into(),
        });
    }
    seen
}
