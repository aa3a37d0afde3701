//! Periodic purge of finished jobs.
//!
//! Deleting a job emits a `delete` notification to anyone still
//! subscribed to it.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::store::JobStore;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Run the retention loop until `cancel` is triggered.
///
/// Every `interval`, terminal jobs last updated more than `retention` ago
/// are deleted.
pub async fn run(
    store: Arc<dyn JobStore>,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_hours = retention.as_secs() / 3600,
        interval_secs = interval.as_secs(),
        "Job retention started"
    );

    let retention = match chrono::Duration::from_std(retention) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "Job retention: retention out of range, not running");
            return;
        }
    };
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention stopping");
                break;
            }
            _ = ticker.tick() => {
                let cutoff = Utc::now() - retention;
                match store.purge_terminal(cutoff).await {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!(deleted, "Job retention: purged finished jobs");
                    }
                    Ok(_) => {
                        tracing::debug!("Job retention: nothing to purge");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Job retention: purge failed");
                    }
                }
            }
        }
    }
}
