//! Exponential-backoff reconnection for job notification channels.
//!
//! Once the job has been created, losing the channel does not affect the
//! job itself. The subscriber re-opens the channel with increasing delays
//! and resumes from the snapshot the server sends after each
//! acknowledgment.

use std::time::Duration;

use atelier_core::types::JobId;
use tokio_util::sync::CancellationToken;

use crate::channel::{JobChannel, JobConnector};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Attempts before giving up; `0` disables reconnection.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Never reconnect: a dropped channel ends the subscription.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Re-open the channel for `job_id` with exponential backoff.
///
/// Returns `None` if `cancel` fires or every attempt fails.
pub async fn reconnect_loop(
    connector: &dyn JobConnector,
    job_id: JobId,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<Box<dyn JobChannel>> {
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        // Wait before each attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        tracing::info!(job_id = %job_id, attempt, "Reopening job subscription");
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(job_id = %job_id, "Reconnect cancelled");
                return None;
            }
            result = connector.open(job_id) => match result {
                Ok(channel) => {
                    tracing::info!(job_id = %job_id, attempt, "Job subscription reopened");
                    return Some(channel);
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Reconnect attempt {attempt} failed");
                }
            }
        }

        delay = next_delay(delay, config);
    }

    None
}
