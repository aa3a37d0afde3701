//! The generation job record and its state machine.
//!
//! ```text
//!   Pending ──► Running ──────────────► Succeeded
//!      │           │                ╲
//!      │           ▼                 ╲
//!      └──► CancellationRequested ────► Failed
//! ```
//!
//! `Succeeded` and `Failed` are terminal: stores reject any further write
//! to a terminal job, so no change notification can follow a terminal one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::progress::{Progress, COMPLETE_PERCENT};
use crate::request::GenerationRequest;
use crate::types::{JobId, Timestamp, UserId};

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    CancellationRequested,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Statuses a worker may still write to.
    pub const ACTIVE: [JobStatus; 3] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::CancellationRequested,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::CancellationRequested => "cancellation_requested",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Re-entering the current state is allowed for non-terminal states so
    /// that repeated progress writes and repeated cancellation requests are
    /// idempotent.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Succeeded | Failed, _) => false,
            (Pending, Pending | Running | CancellationRequested | Succeeded | Failed) => true,
            (Running, Running | CancellationRequested | Succeeded | Failed) => true,
            (CancellationRequested, CancellationRequested | Succeeded | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "cancellation_requested" => Ok(JobStatus::CancellationRequested),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// FailureKind
// ---------------------------------------------------------------------------

/// Why a job ended in [`JobStatus::Failed`]. Every kind implies a refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The generation pipeline raised an error.
    WorkerError,
    /// The owner asked for the job to be cancelled.
    Cancelled,
    /// The reconciliation sweep found the job stuck past its deadline.
    TimedOut,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::WorkerError => "worker_error",
            FailureKind::Cancelled => "cancelled",
            FailureKind::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "worker_error" => Ok(FailureKind::WorkerError),
            "cancelled" => Ok(FailureKind::Cancelled),
            "timed_out" => Ok(FailureKind::TimedOut),
            other => Err(format!("unknown failure kind '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Input for creating a job record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: JobId,
    pub owner: UserId,
    pub cost: i64,
    pub request: GenerationRequest,
}

/// A job record as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub owner: UserId,
    pub status: JobStatus,
    pub cost: i64,
    pub request: GenerationRequest,
    pub progress: Option<Progress>,
    /// Legacy rendering of `progress`, overwritten on every tick.
    pub progress_message: Option<String>,
    /// Artifact reference; its presence is the success signal.
    pub result: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub failure_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// A freshly created, pending record.
    pub fn pending(new: NewJob, now: Timestamp) -> Self {
        Self {
            job_id: new.job_id,
            owner: new.owner,
            status: JobStatus::Pending,
            cost: new.cost,
            request: new.request,
            progress: None,
            progress_message: None,
            result: None,
            failure_kind: None,
            failure_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Server-side percentage estimate for status endpoints.
    pub fn percent(&self) -> u8 {
        if self.result.is_some() {
            COMPLETE_PERCENT
        } else {
            self.progress.as_ref().map_or(0, Progress::percent)
        }
    }

    /// The subscriber-facing projection of this record.
    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.job_id,
            status: self.status,
            cost: self.cost,
            progress: self.progress.clone(),
            progress_message: self.progress_message.clone(),
            percent: self.percent(),
            result: self.result.clone(),
            failure_kind: self.failure_kind,
            failure_message: self.failure_message.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// What subscribers and status endpoints see of a job. Omits the owner and
/// the request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub cost: i64,
    #[serde(default)]
    pub progress: Option<Progress>,
    #[serde(default)]
    pub progress_message: Option<String>,
    #[serde(default)]
    pub percent: u8,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub failure_kind: Option<FailureKind>,
    #[serde(default)]
    pub failure_message: Option<String>,
    pub updated_at: Timestamp,
}

impl JobView {
    /// Structured progress, falling back to parsing the legacy message for
    /// producers that only fill in the string.
    pub fn effective_progress(&self) -> Option<Progress> {
        self.progress
            .clone()
            .or_else(|| self.progress_message.as_deref().map(Progress::parse))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
