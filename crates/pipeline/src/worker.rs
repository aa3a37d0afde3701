//! Worker: executes one job's plan and records everything in the store.
//!
//! The worker has no return channel to whoever triggered it. Progress,
//! success and failure are all store writes, and every failure the worker
//! records is followed by a refund of the job's charge. Cancellation is
//! cooperative: the job status is polled before each plan step.

use std::sync::Arc;

use atelier_core::job::{FailureKind, Job, JobStatus};
use atelier_core::ledger::BalanceLedger;
use atelier_core::progress::Progress;
use atelier_core::store::{JobStore, StoreError};
use atelier_core::types::JobId;

use crate::backend::{BackendError, GenerationBackend};
use crate::plan::{plan, PlanStep, StepKind};
use crate::refund::refund_job;

/// How a worker invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Succeeded { result: String },
    /// The job was marked failed by this invocation.
    Failed { kind: FailureKind, refunded: bool },
    /// The job was missing, already running elsewhere, or finished.
    Skipped,
    /// Another writer (the reconciliation sweep, a retention purge)
    /// finished the job while this invocation was running. Nothing was
    /// refunded here.
    Superseded,
}

/// Why plan execution stopped early.
#[derive(Debug, thiserror::Error)]
enum StepFailure {
    #[error("Cancelled by the owner")]
    Cancelled,

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Plan produced no result")]
    NoResult,
}

pub struct Worker {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn BalanceLedger>,
    backend: Arc<dyn GenerationBackend>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn BalanceLedger>,
        backend: Arc<dyn GenerationBackend>,
    ) -> Self {
        Self {
            store,
            ledger,
            backend,
        }
    }

    /// Run `job_id` to completion.
    pub async fn run(&self, job_id: JobId) -> WorkerOutcome {
        let job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "Worker triggered for unknown job");
                return WorkerOutcome::Skipped;
            }
            Err(e) => {
                // Left for the sweep.
                tracing::error!(job_id = %job_id, error = %e, "Worker could not load job");
                return WorkerOutcome::Skipped;
            }
        };

        match job.status {
            JobStatus::Pending => {}
            JobStatus::CancellationRequested => {
                tracing::info!(job_id = %job_id, "Job cancelled before the worker started");
                return self
                    .fail(&job, FailureKind::Cancelled, "Cancelled before start")
                    .await;
            }
            JobStatus::Running | JobStatus::Succeeded | JobStatus::Failed => {
                tracing::warn!(job_id = %job_id, status = %job.status, "Worker skipping job that is not pending");
                return WorkerOutcome::Skipped;
            }
        }

        tracing::info!(job_id = %job_id, kind = job.request.kind(), "Worker started");

        match self.execute(&job).await {
            Ok(result) => {
                tracing::info!(job_id = %job_id, result = %result, "Job succeeded");
                WorkerOutcome::Succeeded { result }
            }
            Err(StepFailure::Store(StoreError::InvalidTransition { from, .. })) => {
                tracing::info!(job_id = %job_id, status = %from, "Job finished by another writer, worker stopping");
                WorkerOutcome::Superseded
            }
            Err(StepFailure::Store(StoreError::NotFound(_))) => {
                tracing::info!(job_id = %job_id, "Job removed while running, worker stopping");
                WorkerOutcome::Superseded
            }
            Err(StepFailure::Cancelled) => {
                tracing::info!(job_id = %job_id, "Cancellation observed");
                self.fail(&job, FailureKind::Cancelled, "Cancelled by the owner")
                    .await
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Job failed");
                self.fail(&job, FailureKind::WorkerError, &e.to_string())
                    .await
            }
        }
    }

    /// Walk the plan, returning the final artifact URL.
    async fn execute(&self, job: &Job) -> Result<String, StepFailure> {
        let mut layers: Vec<String> = Vec::new();
        let mut result = None;

        for step in plan(&job.request) {
            self.check_cancellation(job.job_id).await?;

            match step {
                PlanStep::Announce(phase) => {
                    self.report(job.job_id, &Progress::phase(phase)).await?;
                }
                PlanStep::Run { input, report } => {
                    let is_composite = input.step == StepKind::Composite;
                    let input = if is_composite {
                        input.with_layers(&layers)
                    } else {
                        input
                    };

                    let artifact = self.backend.execute(job.job_id, &input).await?;
                    tracing::debug!(job_id = %job.job_id, step = ?input.step, url = %artifact.url, "Step finished");

                    if let Some(progress) = report {
                        self.report(job.job_id, &progress).await?;
                    }
                    if is_composite {
                        result = Some(artifact.url);
                    } else {
                        layers.push(artifact.url);
                    }
                }
            }
        }

        let result = result.ok_or(StepFailure::NoResult)?;
        self.check_cancellation(job.job_id).await?;
        self.store.complete(job.job_id, &result).await?;
        Ok(result)
    }

    async fn check_cancellation(&self, job_id: JobId) -> Result<(), StepFailure> {
        match self.store.get(job_id).await? {
            Some(job) if job.status == JobStatus::CancellationRequested => {
                Err(StepFailure::Cancelled)
            }
            Some(job) if job.is_terminal() => Err(StoreError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Running,
            }
            .into()),
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(job_id).into()),
        }
    }

    async fn report(&self, job_id: JobId, progress: &Progress) -> Result<(), StepFailure> {
        tracing::debug!(job_id = %job_id, progress = %progress, "Progress");
        self.store.record_progress(job_id, progress).await?;
        Ok(())
    }

    /// Mark the job failed and refund it if this call made the transition.
    async fn fail(&self, job: &Job, kind: FailureKind, message: &str) -> WorkerOutcome {
        match self.store.fail(job.job_id, kind, message).await {
            Ok(Some(failed)) => {
                let refunded = refund_job(self.ledger.as_ref(), &failed).await;
                WorkerOutcome::Failed { kind, refunded }
            }
            Ok(None) => WorkerOutcome::Superseded,
            Err(e) => {
                // The job stays active; the sweep fails and refunds it later.
                tracing::error!(job_id = %job.job_id, error = %e, "Failed to record job failure");
                WorkerOutcome::Failed {
                    kind,
                    refunded: false,
                }
            }
        }
    }
}
