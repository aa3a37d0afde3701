//! Row model for the `jobs` table.

use atelier_core::job::{FailureKind, Job, JobStatus};
use atelier_core::progress::Progress;
use atelier_core::request::GenerationRequest;
use atelier_core::types::{JobId, Timestamp, UserId};
use sqlx::FromRow;

/// A row from the `jobs` table, before its text and JSON columns are
/// decoded into domain types.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub job_id: uuid::Uuid,
    pub owner: UserId,
    pub status: String,
    pub cost: i64,
    pub request: serde_json::Value,
    pub progress: Option<serde_json::Value>,
    pub progress_message: Option<String>,
    pub result: Option<String>,
    pub failure_kind: Option<String>,
    pub failure_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A column held a value the domain model does not recognise.
#[derive(Debug, thiserror::Error)]
#[error("Malformed job row {job_id}: {reason}")]
pub struct MalformedJobRow {
    pub job_id: uuid::Uuid,
    pub reason: String,
}

impl JobRow {
    pub fn status(&self) -> Result<JobStatus, MalformedJobRow> {
        self.status.parse().map_err(|reason| MalformedJobRow {
            job_id: self.job_id,
            reason,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = MalformedJobRow;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let malformed = |reason: String| MalformedJobRow {
            job_id: row.job_id,
            reason,
        };

        let status = row.status()?;
        let request: GenerationRequest = serde_json::from_value(row.request.clone())
            .map_err(|e| malformed(format!("request: {e}")))?;
        let progress: Option<Progress> = row
            .progress
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| malformed(format!("progress: {e}")))?;
        let failure_kind: Option<FailureKind> = row
            .failure_kind
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(malformed)?;

        Ok(Job {
            job_id: JobId::from_uuid(row.job_id),
            owner: row.owner,
            status,
            cost: row.cost,
            request,
            progress,
            progress_message: row.progress_message,
            result: row.result,
            failure_kind,
            failure_message: row.failure_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
