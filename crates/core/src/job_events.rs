//! Job change notifications and the per-job WebSocket wire protocol.
//!
//! Stores emit a [`JobChange`] for every successful mutation; the API turns
//! them into [`JobChannelMessage`]s for the subscriber of that job.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobView};
use crate::types::{JobId, UserId};

/// Subscription confirmed; the client may now create the job.
pub const MSG_TYPE_SUBSCRIBED: &str = "subscribed";

/// The job record changed (progress, result, status).
pub const MSG_TYPE_UPDATE: &str = "update";

/// The job record was removed.
pub const MSG_TYPE_DELETE: &str = "delete";

/// The server gave up on the subscription.
pub const MSG_TYPE_ERROR: &str = "error";

/// A mutation of one job record, in the order the store applied it.
#[derive(Debug, Clone, PartialEq)]
pub enum JobChange {
    Updated(Job),
    Deleted { job_id: JobId, owner: UserId },
}

impl JobChange {
    pub fn job_id(&self) -> JobId {
        match self {
            JobChange::Updated(job) => job.job_id,
            JobChange::Deleted { job_id, .. } => *job_id,
        }
    }

    pub fn owner(&self) -> UserId {
        match self {
            JobChange::Updated(job) => job.owner,
            JobChange::Deleted { owner, .. } => *owner,
        }
    }

    /// Whether nothing can follow this change for the same job.
    pub fn is_terminal(&self) -> bool {
        match self {
            JobChange::Updated(job) => job.is_terminal(),
            JobChange::Deleted { .. } => true,
        }
    }
}

/// Receives change notifications from a store.
///
/// Implementations must not block; stores call this while holding the
/// lock that orders writes for a job.
pub trait JobChangeSink: Send + Sync {
    fn publish(&self, change: JobChange);
}

/// Messages sent from the server to a job subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobChannelMessage {
    /// Subscription acknowledgment; never carries job data.
    Subscribed { job_id: JobId },
    Update { job: JobView },
    Delete { job_id: JobId },
    /// The server is closing the subscription abnormally.
    Error { message: String },
}

impl JobChannelMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            JobChannelMessage::Subscribed { .. } => MSG_TYPE_SUBSCRIBED,
            JobChannelMessage::Update { .. } => MSG_TYPE_UPDATE,
            JobChannelMessage::Delete { .. } => MSG_TYPE_DELETE,
            JobChannelMessage::Error { .. } => MSG_TYPE_ERROR,
        }
    }

    /// Whether the server closes the subscription after this message.
    pub fn is_terminal(&self) -> bool {
        match self {
            JobChannelMessage::Subscribed { .. } => false,
            JobChannelMessage::Update { job } => job.status.is_terminal() || job.result.is_some(),
            JobChannelMessage::Delete { .. } | JobChannelMessage::Error { .. } => true,
        }
    }
}

impl From<&JobChange> for JobChannelMessage {
    fn from(change: &JobChange) -> Self {
        match change {
            JobChange::Updated(job) => JobChannelMessage::Update { job: job.view() },
            JobChange::Deleted { job_id, .. } => JobChannelMessage::Delete { job_id: *job_id },
        }
    }
}
