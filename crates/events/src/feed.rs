//! Per-job fan-out of [`JobChange`]s.
//!
//! A topic is created by the first [`JobFeed::subscribe`] for a job id,
//! which may happen before the job exists: subscribers register first and
//! the job is created afterwards, so the creation event is never missed.
//! The topic is dropped after a terminal change is published or when its
//! last subscription goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use atelier_core::job_events::{JobChange, JobChangeSink};
use atelier_core::types::JobId;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Default buffer capacity for each job's broadcast channel.
///
/// A job produces a handful of changes per step, so a slow subscriber only
/// lags if it stops reading entirely.
const DEFAULT_CAPACITY: usize = 64;

struct Topic {
    sender: broadcast::Sender<JobChange>,
    /// Distinguishes a topic from one re-created later for the same job.
    generation: u64,
}

#[derive(Default)]
struct Topics {
    by_job: HashMap<JobId, Topic>,
    next_generation: u64,
}

// ---------------------------------------------------------------------------
// JobFeed
// ---------------------------------------------------------------------------

/// Change-notification hub shared via `Arc<JobFeed>`.
pub struct JobFeed {
    topics: Mutex<Topics>,
    capacity: usize,
}

impl JobFeed {
    /// Create a feed whose per-job channels buffer `capacity` changes.
    ///
    /// A subscriber that falls further behind observes
    /// `RecvError::Lagged` and must resynchronise from the store.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(Topics::default()),
            capacity: capacity.max(1),
        }
    }

    fn topics(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to changes of one job.
    pub fn subscribe(self: &Arc<Self>, job_id: JobId) -> JobSubscription {
        let mut topics = self.topics();
        let (receiver, generation) = match topics.by_job.get(&job_id) {
            Some(topic) => (topic.sender.subscribe(), topic.generation),
            None => {
                let generation = topics.next_generation;
                topics.next_generation += 1;
                let (sender, receiver) = broadcast::channel(self.capacity);
                topics
                    .by_job
                    .insert(job_id, Topic { sender, generation });
                (receiver, generation)
            }
        };

        JobSubscription {
            job_id,
            generation,
            receiver,
            feed: Arc::clone(self),
        }
    }

    /// Deliver a change to the job's current subscribers.
    ///
    /// Changes for jobs nobody subscribed to are dropped.
    pub fn publish(&self, change: JobChange) {
        let job_id = change.job_id();
        let terminal = change.is_terminal();
        let mut topics = self.topics();

        if let Some(topic) = topics.by_job.get(&job_id) {
            // Ignore the SendError: it only means every receiver is gone.
            let _ = topic.sender.send(change);
            if terminal {
                topics.by_job.remove(&job_id);
            }
        }
    }

    /// Whether anyone is currently subscribed to `job_id`.
    pub fn has_subscribers(&self, job_id: JobId) -> bool {
        self.topics().by_job.contains_key(&job_id)
    }

    /// Number of subscriptions on `job_id`.
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.topics()
            .by_job
            .get(&job_id)
            .map_or(0, |topic| topic.sender.receiver_count())
    }

    /// Jobs with at least one subscription.
    pub fn subscribed_jobs(&self) -> Vec<JobId> {
        self.topics().by_job.keys().copied().collect()
    }

    /// Number of live topics.
    pub fn topic_count(&self) -> usize {
        self.topics().by_job.len()
    }

    fn release(&self, job_id: JobId, generation: u64) {
        let mut topics = self.topics();
        let unused = topics
            .by_job
            .get(&job_id)
            // The releasing receiver is still alive and counted.
            .is_some_and(|topic| topic.generation == generation && topic.sender.receiver_count() <= 1);
        if unused {
            topics.by_job.remove(&job_id);
        }
    }
}

impl Default for JobFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl JobChangeSink for JobFeed {
    fn publish(&self, change: JobChange) {
        JobFeed::publish(self, change);
    }
}

// ---------------------------------------------------------------------------
// JobSubscription
// ---------------------------------------------------------------------------

/// A live subscription to one job's changes. Dropping it unsubscribes.
pub struct JobSubscription {
    job_id: JobId,
    generation: u64,
    receiver: broadcast::Receiver<JobChange>,
    feed: Arc<JobFeed>,
}

impl JobSubscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the next change.
    ///
    /// Returns `RecvError::Closed` once a terminal change has been
    /// delivered and the topic dropped, and `RecvError::Lagged` if this
    /// subscriber fell behind the channel capacity.
    pub async fn recv(&mut self) -> Result<JobChange, RecvError> {
        self.receiver.recv().await
    }
}

impl Drop for JobSubscription {
    fn drop(&mut self) {
        self.feed.release(self.job_id, self.generation);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
