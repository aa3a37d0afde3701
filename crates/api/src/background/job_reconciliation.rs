//! Periodic sweep that fails and refunds jobs stuck past their deadline.
//!
//! Covers workers that crashed, were never triggered, or hang on the
//! generation backend. A worker still running a swept job stops at its
//! next store write without refunding again.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::ledger::BalanceLedger;
use atelier_core::store::JobStore;
use atelier_pipeline::reconcile_stale;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Run the reconciliation loop until `cancel` is triggered.
///
/// Every `interval`, jobs that have been active for longer than
/// `max_duration` are failed with `timed_out` and refunded.
pub async fn run(
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn BalanceLedger>,
    max_duration: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        max_duration_secs = max_duration.as_secs(),
        interval_secs = interval.as_secs(),
        "Job reconciliation started"
    );

    let max_duration = match chrono::Duration::from_std(max_duration) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "Job reconciliation: max duration out of range, not running");
            return;
        }
    };
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job reconciliation stopping");
                break;
            }
            _ = ticker.tick() => {
                let cutoff = Utc::now() - max_duration;
                match reconcile_stale(store.as_ref(), ledger.as_ref(), cutoff).await {
                    Ok(report) if report.timed_out > 0 => {
                        tracing::warn!(
                            examined = report.examined,
                            timed_out = report.timed_out,
                            refunded = report.refunded,
                            "Job reconciliation: failed stale jobs"
                        );
                    }
                    Ok(report) => {
                        tracing::debug!(examined = report.examined, "Job reconciliation: nothing stale");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Job reconciliation: sweep failed");
                    }
                }
            }
        }
    }
}
