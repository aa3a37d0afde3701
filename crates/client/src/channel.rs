//! The notification-channel seam between the subscriber and its transport.

use async_trait::async_trait;
use atelier_core::job_events::JobChannelMessage;
use atelier_core::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel could not be opened.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The server refused the subscription (401, 403, ...).
    #[error("Subscription rejected with status {status}")]
    Rejected { status: u16 },

    /// The transport dropped without a close handshake.
    #[error("Connection lost: {0}")]
    Lost(String),

    /// The server sent something that is not a job message.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// An open subscription to one job's messages.
#[async_trait]
pub trait JobChannel: Send {
    /// Wait for the next message.
    ///
    /// Returns `Ok(None)` once the server has closed the channel normally.
    async fn next_message(&mut self) -> Result<Option<JobChannelMessage>, ChannelError>;

    /// Close the local end. Never affects the job.
    async fn close(&mut self);
}

/// Opens [`JobChannel`]s. The server must acknowledge each one with a
/// `subscribed` message before sending job data.
#[async_trait]
pub trait JobConnector: Send + Sync {
    async fn open(&self, job_id: JobId) -> Result<Box<dyn JobChannel>, ChannelError>;
}
