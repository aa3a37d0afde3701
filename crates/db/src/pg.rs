//! PostgreSQL implementations of [`JobStore`] and [`BalanceLedger`].
//!
//! Change notifications are not published from here: the
//! `trg_jobs_notify` trigger emits a `NOTIFY job_changes` for every
//! committed write, which `atelier-events` relays to subscribers. That
//! keeps notifications in commit order even with several writer processes.

use async_trait::async_trait;
use atelier_core::job::{FailureKind, Job, JobStatus, NewJob};
use atelier_core::ledger::{BalanceLedger, LedgerError, Refund};
use atelier_core::progress::Progress;
use atelier_core::store::{JobStore, StoreError};
use atelier_core::types::{JobId, Timestamp, UserId};

use crate::models::job::JobRow;
use crate::repositories::{DebitOutcome, JobRepo, LedgerRepo, RefundOutcome};
use crate::DbPool;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn ledger_backend(e: sqlx::Error) -> LedgerError {
    LedgerError::Backend(e.to_string())
}

fn decode(row: JobRow) -> Result<Job, StoreError> {
    Job::try_from(row).map_err(backend)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

// ---------------------------------------------------------------------------
// PgJobStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Explain why a guarded update matched no row.
    async fn rejected(&self, job_id: JobId, to: JobStatus) -> StoreError {
        match JobRepo::find(&self.pool, job_id).await {
            Ok(None) => StoreError::NotFound(job_id),
            Ok(Some(row)) => match row.status() {
                Ok(from) => StoreError::InvalidTransition { job_id, from, to },
                Err(e) => backend(e),
            },
            Err(e) => backend(e),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, new: NewJob) -> Result<Job, StoreError> {
        let request = serde_json::to_value(&new.request).map_err(backend)?;
        match JobRepo::insert(&self.pool, &new, &request).await {
            Ok(row) => decode(row),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate(new.job_id)),
            Err(e) => Err(backend(e)),
        }
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        JobRepo::find(&self.pool, job_id)
            .await
            .map_err(backend)?
            .map(decode)
            .transpose()
    }

    async fn record_progress(
        &self,
        job_id: JobId,
        progress: &Progress,
    ) -> Result<Job, StoreError> {
        let value = serde_json::to_value(progress).map_err(backend)?;
        let message = progress.to_string();
        match JobRepo::update_progress(&self.pool, job_id, &value, &message)
            .await
            .map_err(backend)?
        {
            Some(row) => decode(row),
            None => Err(self.rejected(job_id, JobStatus::Running).await),
        }
    }

    async fn complete(&self, job_id: JobId, result: &str) -> Result<Job, StoreError> {
        match JobRepo::complete(&self.pool, job_id, result)
            .await
            .map_err(backend)?
        {
            Some(row) => decode(row),
            None => Err(self.rejected(job_id, JobStatus::Succeeded).await),
        }
    }

    async fn fail(
        &self,
        job_id: JobId,
        kind: FailureKind,
        message: &str,
    ) -> Result<Option<Job>, StoreError> {
        match JobRepo::fail(&self.pool, job_id, kind, message)
            .await
            .map_err(backend)?
        {
            Some(row) => decode(row).map(Some),
            None => match self.rejected(job_id, JobStatus::Failed).await {
                StoreError::InvalidTransition { .. } => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn request_cancellation(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        match JobRepo::request_cancellation(&self.pool, job_id)
            .await
            .map_err(backend)?
        {
            Some(row) => decode(row).map(Some),
            None => match self.rejected(job_id, JobStatus::CancellationRequested).await {
                StoreError::InvalidTransition { .. } => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, StoreError> {
        JobRepo::delete(&self.pool, job_id).await.map_err(backend)
    }

    async fn list_stale(&self, cutoff: Timestamp) -> Result<Vec<Job>, StoreError> {
        JobRepo::list_stale(&self.pool, cutoff)
            .await
            .map_err(backend)?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn purge_terminal(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        JobRepo::purge_terminal(&self.pool, cutoff)
            .await
            .map_err(backend)
    }
}

// ---------------------------------------------------------------------------
// PgLedger
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceLedger for PgLedger {
    async fn balance(&self, owner: UserId) -> Result<i64, LedgerError> {
        LedgerRepo::balance(&self.pool, owner)
            .await
            .map_err(ledger_backend)
    }

    async fn debit(&self, owner: UserId, job_id: JobId, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        match LedgerRepo::debit(&self.pool, owner, job_id, amount)
            .await
            .map_err(ledger_backend)?
        {
            DebitOutcome::Debited { balance } => Ok(balance),
            DebitOutcome::Insufficient { balance } => Err(LedgerError::InsufficientBalance {
                balance,
                required: amount,
            }),
            DebitOutcome::AlreadyCharged => Err(LedgerError::DuplicateCharge(job_id)),
        }
    }

    async fn refund(&self, owner: UserId, job_id: JobId) -> Result<Refund, LedgerError> {
        match LedgerRepo::refund(&self.pool, owner, job_id)
            .await
            .map_err(ledger_backend)?
        {
            RefundOutcome::Refunded { amount, balance } => Ok(Refund::Applied { amount, balance }),
            RefundOutcome::AlreadyRefunded => Ok(Refund::AlreadyRefunded),
            RefundOutcome::NoCharge => Err(LedgerError::NoCharge(job_id)),
        }
    }

    async fn grant(&self, owner: UserId, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        LedgerRepo::grant(&self.pool, owner, amount)
            .await
            .map_err(ledger_backend)
    }
}
