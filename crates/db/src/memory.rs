//! In-process [`JobStore`] and [`BalanceLedger`] implementations.
//!
//! Used by the API when no `DATABASE_URL` is configured and by tests
//! across the workspace. The store publishes each change to its sink while
//! still holding the map lock, so per-job notifications leave in exactly
//! the order the writes were applied.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use atelier_core::job::{FailureKind, Job, JobStatus, NewJob};
use atelier_core::job_events::{JobChange, JobChangeSink};
use atelier_core::ledger::{BalanceLedger, LedgerError, Refund};
use atelier_core::progress::Progress;
use atelier_core::store::{JobStore, StoreError};
use atelier_core::types::{JobId, Timestamp, UserId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    sink: Option<Arc<dyn JobChangeSink>>,
}

impl MemoryJobStore {
    /// A store that publishes no change notifications.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that publishes every change to `sink`.
    pub fn with_sink(sink: Arc<dyn JobChangeSink>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            sink: Some(sink),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, change: JobChange) {
        if let Some(sink) = &self.sink {
            sink.publish(change);
        }
    }

    /// Move a job to the status `target` picks for it, apply `mutate` and
    /// publish the result.
    fn update_active(
        &self,
        job_id: JobId,
        target: impl FnOnce(JobStatus) -> JobStatus,
        mutate: impl FnOnce(&mut Job),
    ) -> Result<Job, StoreError> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        let to = target(job.status);
        if !job.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                job_id,
                from: job.status,
                to,
            });
        }

        mutate(job);
        job.updated_at = chrono::Utc::now();
        let snapshot = job.clone();
        self.publish(JobChange::Updated(snapshot.clone()));
        Ok(snapshot)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<Job, StoreError> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&new.job_id) {
            return Err(StoreError::Duplicate(new.job_id));
        }
        let job = Job::pending(new, chrono::Utc::now());
        jobs.insert(job.job_id, job.clone());
        self.publish(JobChange::Updated(job.clone()));
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(lock(&self.jobs).get(&job_id).cloned())
    }

    async fn record_progress(
        &self,
        job_id: JobId,
        progress: &Progress,
    ) -> Result<Job, StoreError> {
        let target = |status: JobStatus| match status {
            JobStatus::Pending => JobStatus::Running,
            other => other,
        };
        self.update_active(job_id, target, |job| {
            job.status = target(job.status);
            job.progress_message = Some(progress.to_string());
            job.progress = Some(progress.clone());
        })
    }

    async fn complete(&self, job_id: JobId, result: &str) -> Result<Job, StoreError> {
        self.update_active(job_id, |_| JobStatus::Succeeded, |job| {
            job.status = JobStatus::Succeeded;
            job.result = Some(result.to_string());
        })
    }

    async fn fail(
        &self,
        job_id: JobId,
        kind: FailureKind,
        message: &str,
    ) -> Result<Option<Job>, StoreError> {
        match self.update_active(job_id, |_| JobStatus::Failed, |job| {
            job.status = JobStatus::Failed;
            job.failure_kind = Some(kind);
            job.failure_message = Some(message.to_string());
        }) {
            Ok(job) => Ok(Some(job)),
            Err(StoreError::InvalidTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn request_cancellation(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        match job.status {
            JobStatus::Pending | JobStatus::Running => {
                job.status = JobStatus::CancellationRequested;
                job.updated_at = chrono::Utc::now();
                let snapshot = job.clone();
                self.publish(JobChange::Updated(snapshot.clone()));
                Ok(Some(snapshot))
            }
            // Already flagged: no write, no notification.
            JobStatus::CancellationRequested => Ok(Some(job.clone())),
            JobStatus::Succeeded | JobStatus::Failed => Ok(None),
        }
    }

    async fn delete(&self, job_id: JobId) -> Result<bool, StoreError> {
        let mut jobs = lock(&self.jobs);
        match jobs.remove(&job_id) {
            Some(job) => {
                self.publish(JobChange::Deleted {
                    job_id,
                    owner: job.owner,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_stale(&self, cutoff: Timestamp) -> Result<Vec<Job>, StoreError> {
        let jobs = lock(&self.jobs);
        let mut stale: Vec<Job> = jobs
            .values()
            .filter(|job| !job.is_terminal() && job.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.created_at);
        Ok(stale)
    }

    async fn purge_terminal(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut jobs = lock(&self.jobs);
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|job| job.is_terminal() && job.updated_at < cutoff)
            .map(|job| job.job_id)
            .collect();

        for job_id in &expired {
            if let Some(job) = jobs.remove(job_id) {
                self.publish(JobChange::Deleted {
                    job_id: *job_id,
                    owner: job.owner,
                });
            }
        }
        Ok(expired.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LedgerState {
    balances: HashMap<UserId, i64>,
    /// job -> (owner, amount charged)
    charges: HashMap<JobId, (UserId, i64)>,
    refunded: HashSet<JobId>,
}

impl LedgerState {
    fn balance_mut(&mut self, owner: UserId, starting_balance: i64) -> &mut i64 {
        self.balances.entry(owner).or_insert(starting_balance)
    }
}

/// In-memory ledger. Owners seen for the first time start with
/// `starting_balance` credits.
///
/// Charge and refund records are kept for the life of the process, one
/// entry per job ever charged, like the `ledger_entries` table they stand
/// in for. Retention purges job records only, so a purged job id still
/// cannot be charged or refunded twice. Long-running deployments should
/// set `DATABASE_URL`.
#[derive(Default)]
pub struct MemoryLedger {
    starting_balance: i64,
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_starting_balance(starting_balance: i64) -> Self {
        Self {
            starting_balance,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Number of jobs charged so far.
    pub fn charge_count(&self) -> usize {
        lock(&self.state).charges.len()
    }

    /// Whether `job_id` has been refunded.
    pub fn is_refunded(&self, job_id: JobId) -> bool {
        lock(&self.state).refunded.contains(&job_id)
    }
}

#[async_trait]
impl BalanceLedger for MemoryLedger {
    async fn balance(&self, owner: UserId) -> Result<i64, LedgerError> {
        let state = lock(&self.state);
        Ok(state
            .balances
            .get(&owner)
            .copied()
            .unwrap_or(self.starting_balance))
    }

    async fn debit(&self, owner: UserId, job_id: JobId, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut state = lock(&self.state);
        if state.charges.contains_key(&job_id) {
            return Err(LedgerError::DuplicateCharge(job_id));
        }

        let balance = state.balance_mut(owner, self.starting_balance);
        if *balance < amount {
            return Err(LedgerError::InsufficientBalance {
                balance: *balance,
                required: amount,
            });
        }
        *balance -= amount;
        let new_balance = *balance;
        state.charges.insert(job_id, (owner, amount));
        Ok(new_balance)
    }

    async fn refund(&self, owner: UserId, job_id: JobId) -> Result<Refund, LedgerError> {
        let mut state = lock(&self.state);
        let amount = match state.charges.get(&job_id) {
            Some(&(charged_owner, amount)) if charged_owner == owner => amount,
            _ => return Err(LedgerError::NoCharge(job_id)),
        };
        if !state.refunded.insert(job_id) {
            return Ok(Refund::AlreadyRefunded);
        }

        let balance = state.balance_mut(owner, self.starting_balance);
        *balance += amount;
        Ok(Refund::Applied {
            amount,
            balance: *balance,
        })
    }

    async fn grant(&self, owner: UserId, amount: i64) -> Result<i64, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let mut state = lock(&self.state);
        let balance = state.balance_mut(owner, self.starting_balance);
        *balance += amount;
        Ok(*balance)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
