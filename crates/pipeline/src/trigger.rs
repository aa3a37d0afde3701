//! Fire-and-forget hand-off from the spawner to a worker.
//!
//! Triggers never report back: the job store is the only feedback path,
//! and a trigger that is lost is recovered by the reconciliation sweep.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::types::JobId;
use serde::{Deserialize, Serialize};

use crate::worker::Worker;

pub trait WorkerTrigger: Send + Sync {
    /// Start the worker for `job_id` without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    fn trigger(&self, job_id: JobId);
}

/// Body of the worker service's `POST /run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub job_id: JobId,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerTriggerError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Worker rejected job ({status}): {body}")]
    Rejected { status: u16, body: String },
}

// ---------------------------------------------------------------------------
// InProcessTrigger
// ---------------------------------------------------------------------------

/// Runs the worker as a detached task on the current runtime.
pub struct InProcessTrigger {
    worker: Arc<Worker>,
}

impl InProcessTrigger {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self { worker }
    }
}

impl WorkerTrigger for InProcessTrigger {
    fn trigger(&self, job_id: JobId) {
        let worker = Arc::clone(&self.worker);
        tokio::spawn(async move {
            worker.run(job_id).await;
        });
    }
}

// ---------------------------------------------------------------------------
// HttpTrigger
// ---------------------------------------------------------------------------

/// Posts `{ job_id }` to an out-of-process worker service.
#[derive(Clone)]
pub struct HttpTrigger {
    client: reqwest::Client,
    worker_url: String,
}

impl HttpTrigger {
    /// * `worker_url` - base URL of the worker service, e.g.
    ///   `http://worker:3100`.
    pub fn new(worker_url: impl Into<String>, timeout: Duration) -> Result<Self, WorkerTriggerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            worker_url: worker_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Deliver one trigger and wait for the worker to accept it.
    pub async fn send(&self, job_id: JobId) -> Result<(), WorkerTriggerError> {
        let response = self
            .client
            .post(format!("{}/run", self.worker_url))
            .json(&RunRequest { job_id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(WorkerTriggerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

impl WorkerTrigger for HttpTrigger {
    fn trigger(&self, job_id: JobId) {
        let trigger = self.clone();
        tokio::spawn(async move {
            match trigger.send(job_id).await {
                Ok(()) => tracing::debug!(job_id = %job_id, "Worker triggered"),
                Err(e) => tracing::error!(
                    job_id = %job_id,
                    error = %e,
                    "Worker trigger failed; the job will be swept after its deadline",
                ),
            }
        });
    }
}
