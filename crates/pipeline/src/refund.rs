//! Compensating refunds shared by the spawner, the worker and the sweep.

use atelier_core::job::Job;
use atelier_core::ledger::{BalanceLedger, Refund};
use atelier_core::types::{JobId, UserId};

/// Refund `job_id`'s charge to `owner`. Returns `true` once the owner's
/// balance no longer includes the charge (now or by an earlier refund).
/// Ledger errors are logged.
pub async fn refund_charge(ledger: &dyn BalanceLedger, owner: UserId, job_id: JobId) -> bool {
    match ledger.refund(owner, job_id).await {
        Ok(Refund::Applied { amount, balance }) => {
            tracing::info!(job_id = %job_id, owner, amount, balance, "Charge refunded");
            true
        }
        Ok(Refund::AlreadyRefunded) => {
            tracing::warn!(job_id = %job_id, owner, "Charge was already refunded");
            true
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, owner, error = %e, "Refund failed");
            false
        }
    }
}

/// Refund the charge of a job that has just been marked failed.
pub async fn refund_job(ledger: &dyn BalanceLedger, job: &Job) -> bool {
    refund_charge(ledger, job.owner, job.job_id).await
}
