//! The job store seam.
//!
//! The store is the only channel between the worker and everyone else:
//! each successful mutation below must emit exactly one
//! [`JobChange`](crate::job_events::JobChange), in write order, to the
//! store's change sink.

use async_trait::async_trait;

use crate::job::{FailureKind, Job, JobStatus, NewJob};
use crate::progress::Progress;
use crate::types::{JobId, Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record with this caller-generated id already exists.
    #[error("Job {0} already exists")]
    Duplicate(JobId),

    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The write is not allowed from the job's current status.
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending record. Fails with [`StoreError::Duplicate`]
    /// if the id is taken.
    async fn create(&self, new: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// Overwrite the job's progress. The first write moves a pending job
    /// to running; a pending cancellation is preserved.
    async fn record_progress(&self, job_id: JobId, progress: &Progress)
        -> Result<Job, StoreError>;

    /// Store the result and mark the job succeeded.
    async fn complete(&self, job_id: JobId, result: &str) -> Result<Job, StoreError>;

    /// Mark the job failed.
    ///
    /// Returns `Ok(None)` when the job had already reached a terminal
    /// state; only the caller that receives `Some` owns the refund.
    async fn fail(
        &self,
        job_id: JobId,
        kind: FailureKind,
        message: &str,
    ) -> Result<Option<Job>, StoreError>;

    /// Flag a running or pending job for cancellation. Idempotent while
    /// the flag is set; `Ok(None)` if the job is already terminal.
    async fn request_cancellation(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// Remove the record. Returns `false` if it did not exist.
    async fn delete(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// Non-terminal jobs created before `cutoff`.
    async fn list_stale(&self, cutoff: Timestamp) -> Result<Vec<Job>, StoreError>;

    /// Delete terminal jobs last updated before `cutoff`; returns how many.
    async fn purge_terminal(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}
