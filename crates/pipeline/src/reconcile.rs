//! Reconciliation sweep for jobs that never reached a terminal state.
//!
//! A job can be orphaned by a lost trigger, a crashed worker or a backend
//! that never answers. The sweep fails every job still active past its
//! deadline with [`FailureKind::TimedOut`] and refunds it. A worker that
//! later tries to write to a swept job is rejected by the store and stops
//! without refunding again.

use atelier_core::job::FailureKind;
use atelier_core::ledger::BalanceLedger;
use atelier_core::store::{JobStore, StoreError};
use atelier_core::types::Timestamp;

use crate::refund::refund_job;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale jobs found.
    pub examined: usize,
    /// Jobs this sweep moved to failed.
    pub timed_out: usize,
    /// Jobs whose refund went through.
    pub refunded: usize,
}

/// Fail and refund every active job created before `cutoff`.
pub async fn reconcile_stale(
    store: &dyn JobStore,
    ledger: &dyn BalanceLedger,
    cutoff: Timestamp,
) -> Result<SweepReport, StoreError> {
    let stale = store.list_stale(cutoff).await?;
    let mut report = SweepReport {
        examined: stale.len(),
        ..SweepReport::default()
    };

    for job in stale {
        let message = format!(
            "Job did not finish within its deadline (created {})",
            job.created_at.to_rfc3339()
        );
        match store.fail(job.job_id, FailureKind::TimedOut, &message).await {
            Ok(Some(failed)) => {
                tracing::warn!(job_id = %failed.job_id, owner = failed.owner, "Stale job timed out");
                report.timed_out += 1;
                if refund_job(ledger, &failed).await {
                    report.refunded += 1;
                }
            }
            // Finished between listing and failing.
            Ok(None) => {}
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Failed to time out stale job");
            }
        }
    }

    Ok(report)
}
