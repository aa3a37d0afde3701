//! Relay from PostgreSQL `NOTIFY job_changes` into a [`JobFeed`].
//!
//! The `trg_jobs_notify` trigger only sends `{op, job_id, owner}`. For
//! inserts and updates the relay re-reads the row, so two notifications
//! that race past one read both observe the newest row; the second is
//! recognised by its unchanged `updated_at` and dropped. Rows are only
//! read for jobs someone is subscribed to.

use std::collections::HashMap;
use std::sync::Arc;

use atelier_core::job::Job;
use atelier_core::job_events::JobChange;
use atelier_core::types::{JobId, Timestamp, UserId};
use atelier_db::repositories::JobRepo;
use atelier_db::DbPool;
use serde::Deserialize;
use sqlx::postgres::PgListener;
use tokio_util::sync::CancellationToken;

use crate::feed::JobFeed;

/// Channel name used by the `notify_job_change()` trigger function.
pub const JOB_CHANGES_CHANNEL: &str = "job_changes";

#[derive(Debug, Deserialize)]
struct Notification {
    op: String,
    job_id: JobId,
    owner: UserId,
}

/// Run the relay until `cancel` fires.
///
/// Returns an error only if the initial `LISTEN` fails; connection loss
/// afterwards is retried by the listener, followed by a resync of every
/// subscribed job.
pub async fn run(
    pool: DbPool,
    feed: Arc<JobFeed>,
    cancel: CancellationToken,
) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(&pool).await?;
    listener.listen(JOB_CHANGES_CHANNEL).await?;
    tracing::info!(channel = JOB_CHANGES_CHANNEL, "Job change relay started");

    let mut last_seen: HashMap<JobId, Timestamp> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job change relay stopping");
                break;
            }
            received = listener.recv() => match received {
                Ok(notification) => {
                    relay_one(&pool, &feed, &mut last_seen, notification.payload()).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Job change listener interrupted, resyncing");
                    resync(&pool, &feed, &mut last_seen).await;
                }
            }
        }
    }

    Ok(())
}

async fn relay_one(
    pool: &DbPool,
    feed: &JobFeed,
    last_seen: &mut HashMap<JobId, Timestamp>,
    payload: &str,
) {
    let notification: Notification = match serde_json::from_str(payload) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, payload, "Ignoring malformed job change notification");
            return;
        }
    };

    if notification.op == "delete" {
        last_seen.remove(&notification.job_id);
        feed.publish(JobChange::Deleted {
            job_id: notification.job_id,
            owner: notification.owner,
        });
        return;
    }

    if !feed.has_subscribers(notification.job_id) {
        last_seen.remove(&notification.job_id);
        return;
    }

    match fetch(pool, notification.job_id).await {
        Ok(Some(job)) => forward(feed, last_seen, job),
        // Deleted between the write and the read; its own notification follows.
        Ok(None) => {}
        Err(e) => {
            tracing::error!(job_id = %notification.job_id, error = %e, "Failed to load changed job");
        }
    }
}

/// Re-publish the current row of every subscribed job.
async fn resync(pool: &DbPool, feed: &JobFeed, last_seen: &mut HashMap<JobId, Timestamp>) {
    for job_id in feed.subscribed_jobs() {
        match fetch(pool, job_id).await {
            Ok(Some(job)) => forward(feed, last_seen, job),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to resync job");
            }
        }
    }
}

fn forward(feed: &JobFeed, last_seen: &mut HashMap<JobId, Timestamp>, job: Job) {
    if last_seen
        .get(&job.job_id)
        .is_some_and(|seen| *seen >= job.updated_at)
    {
        return;
    }

    if job.is_terminal() {
        last_seen.remove(&job.job_id);
    } else {
        last_seen.insert(job.job_id, job.updated_at);
    }
    feed.publish(JobChange::Updated(job));
}

async fn fetch(pool: &DbPool, job_id: JobId) -> Result<Option<Job>, String> {
    let row = JobRepo::find(pool, job_id)
        .await
        .map_err(|e| e.to_string())?;
    row.map(Job::try_from)
        .transpose()
        .map_err(|e| e.to_string())
}
