//! Job Spawner: the synchronous half of job submission.
//!
//! Side effects happen in a fixed order: debit the ledger, create the
//! pending job record, fire the worker trigger. A failed debit leaves no
//! trace; a failed record creation is compensated with a refund before
//! the error is returned.

use std::sync::Arc;

use atelier_core::error::CoreError;
use atelier_core::job::NewJob;
use atelier_core::ledger::{BalanceLedger, LedgerError};
use atelier_core::request::GenerationRequest;
use atelier_core::store::{JobStore, StoreError};
use atelier_core::types::{JobId, UserId};
use serde::Serialize;

use crate::refund::refund_charge;
use crate::trigger::WorkerTrigger;

/// What the caller learns from a successful spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpawnReceipt {
    pub job_id: JobId,
    pub cost: i64,
    pub new_balance: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The request failed validation; nothing was charged.
    #[error(transparent)]
    Invalid(#[from] CoreError),

    /// The owner cannot afford the job; nothing was charged.
    #[error("Insufficient balance: {required} required, {balance} available")]
    InsufficientBalance { balance: i64, required: i64 },

    /// The job id was already charged by an earlier spawn.
    #[error("Job {0} already exists")]
    Duplicate(JobId),

    /// The charge went through but the record could not be created.
    #[error("Job {job_id} could not be created (refunded: {refunded}): {source}")]
    JobCreation {
        job_id: JobId,
        #[source]
        source: StoreError,
        refunded: bool,
    },

    #[error(transparent)]
    Ledger(LedgerError),
}

pub struct JobSpawner {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn BalanceLedger>,
    trigger: Arc<dyn WorkerTrigger>,
}

impl JobSpawner {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn BalanceLedger>,
        trigger: Arc<dyn WorkerTrigger>,
    ) -> Self {
        Self {
            store,
            ledger,
            trigger,
        }
    }

    /// Charge `owner` for `request` and start it under the caller-chosen
    /// `job_id`.
    ///
    /// Returns once the record exists and the worker has been triggered;
    /// the worker itself runs detached.
    pub async fn spawn(
        &self,
        owner: UserId,
        job_id: JobId,
        request: GenerationRequest,
    ) -> Result<SpawnReceipt, SpawnError> {
        request.validate()?;
        let cost = request.cost();
        if cost <= 0 {
            return Err(CoreError::Validation(format!("Job cost must be positive (got {cost})")).into());
        }

        let new_balance = match self.ledger.debit(owner, job_id, cost).await {
            Ok(balance) => balance,
            Err(LedgerError::InsufficientBalance { balance, required }) => {
                tracing::info!(job_id = %job_id, owner, balance, required, "Spawn rejected: insufficient balance");
                return Err(SpawnError::InsufficientBalance { balance, required });
            }
            Err(LedgerError::DuplicateCharge(id)) => return Err(SpawnError::Duplicate(id)),
            Err(e) => return Err(SpawnError::Ledger(e)),
        };

        let kind = request.kind();
        let new = NewJob {
            job_id,
            owner,
            cost,
            request,
        };
        if let Err(source) = self.store.create(new).await {
            tracing::error!(job_id = %job_id, owner, error = %source, "Job creation failed after debit, refunding");
            let refunded = refund_charge(self.ledger.as_ref(), owner, job_id).await;
            return Err(SpawnError::JobCreation {
                job_id,
                source,
                refunded,
            });
        }

        tracing::info!(job_id = %job_id, owner, kind, cost, new_balance, "Job spawned");
        self.trigger.trigger(job_id);

        Ok(SpawnReceipt {
            job_id,
            cost,
            new_balance,
        })
    }
}
