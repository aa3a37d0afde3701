//! Repository for the `jobs` table.
//!
//! Status transitions are expressed as conditional `UPDATE ... WHERE
//! status IN (...)` statements so that concurrent writers (worker, sweep,
//! cancellation endpoint) can never move a job out of a terminal state.
//! A `None` return means the guard did not match; callers decide whether
//! that was a missing row or a rejected transition.

use atelier_core::job::{FailureKind, JobStatus, NewJob};
use atelier_core::types::{JobId, Timestamp};
use sqlx::PgPool;

use crate::models::job::JobRow;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    job_id, owner, status, cost, request, progress, progress_message, \
    result, failure_kind, failure_message, created_at, updated_at";

/// `status IN (...)` guard for jobs a worker may still write to.
const ACTIVE_GUARD: &str = "status IN ('pending', 'running', 'cancellation_requested')";

/// `status IN (...)` guard for finished jobs.
const TERMINAL_GUARD: &str = "status IN ('succeeded', 'failed')";

/// Provides the job store queries.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job.
    pub async fn insert(
        pool: &PgPool,
        new: &NewJob,
        request: &serde_json::Value,
    ) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (job_id, owner, status, cost, request) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(new.job_id.as_uuid())
            .bind(new.owner)
            .bind(JobStatus::Pending.as_str())
            .bind(new.cost)
            .bind(request)
            .fetch_one(pool)
            .await
    }

    /// Find a job by its id.
    pub async fn find(pool: &PgPool, job_id: JobId) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE job_id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id.as_uuid())
            .fetch_optional(pool)
            .await
    }

    /// Overwrite progress; promotes `pending` to `running`.
    pub async fn update_progress(
        pool: &PgPool,
        job_id: JobId,
        progress: &serde_json::Value,
        message: &str,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET progress = $2, progress_message = $3, \
                 status = CASE WHEN status = 'pending' THEN 'running' ELSE status END, \
                 updated_at = clock_timestamp() \
             WHERE job_id = $1 AND {ACTIVE_GUARD} \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id.as_uuid())
            .bind(progress)
            .bind(message)
            .fetch_optional(pool)
            .await
    }

    /// Store the result and mark the job succeeded.
    pub async fn complete(
        pool: &PgPool,
        job_id: JobId,
        result: &str,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, result = $3, updated_at = clock_timestamp() \
             WHERE job_id = $1 AND {ACTIVE_GUARD} \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id.as_uuid())
            .bind(JobStatus::Succeeded.as_str())
            .bind(result)
            .fetch_optional(pool)
            .await
    }

    /// Mark the job failed with a classification and message.
    pub async fn fail(
        pool: &PgPool,
        job_id: JobId,
        kind: FailureKind,
        message: &str,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, failure_kind = $3, failure_message = $4, \
                 updated_at = clock_timestamp() \
             WHERE job_id = $1 AND {ACTIVE_GUARD} \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id.as_uuid())
            .bind(JobStatus::Failed.as_str())
            .bind(kind.as_str())
            .bind(message)
            .fetch_optional(pool)
            .await
    }

    /// Flag a non-terminal job for cancellation.
    ///
    /// Re-flagging an already flagged job does not touch the row, so no
    /// duplicate change notification is produced.
    pub async fn request_cancellation(
        pool: &PgPool,
        job_id: JobId,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, updated_at = clock_timestamp() \
             WHERE job_id = $1 AND status IN ('pending', 'running') \
             RETURNING {COLUMNS}"
        );
        let flagged = sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id.as_uuid())
            .bind(JobStatus::CancellationRequested.as_str())
            .fetch_optional(pool)
            .await?;
        if flagged.is_some() {
            return Ok(flagged);
        }

        let row = Self::find(pool, job_id).await?;
        Ok(row.filter(|r| r.status == JobStatus::CancellationRequested.as_str()))
    }

    /// Delete a job. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, job_id: JobId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE job_id = $1")
            .bind(job_id.as_uuid())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Active jobs created before `cutoff`, oldest first.
    pub async fn list_stale(pool: &PgPool, cutoff: Timestamp) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE {ACTIVE_GUARD} AND created_at < $1 \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(cutoff)
            .fetch_all(pool)
            .await
    }

    /// Delete terminal jobs whose last write is older than `cutoff`.
    pub async fn purge_terminal(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let query = format!("DELETE FROM jobs WHERE {TERMINAL_GUARD} AND updated_at < $1");
        let result = sqlx::query(&query).bind(cutoff).execute(pool).await?;
        Ok(result.rows_affected())
    }
}
