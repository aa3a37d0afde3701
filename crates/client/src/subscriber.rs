//! Subscribe-then-create orchestration for one generation job.
//!
//! The order matters: the notification channel is opened and acknowledged
//! before the job is created, so the first update can never be missed.
//! After creation the subscriber only observes; cancelling it closes the
//! local channel and leaves the job (and its charge) to the worker.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::job::{FailureKind, JobView};
use atelier_core::job_events::JobChannelMessage;
use atelier_core::request::GenerationRequest;
use atelier_core::types::JobId;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelError, JobChannel, JobConnector};
use crate::config::ClientConfig;
use crate::http::{ApiClientError, HttpJobsApi, JobsApi};
use crate::reconnect::{reconnect_loop, ReconnectConfig};
use crate::tracker::{Applied, ProgressSnapshot, ProgressTracker, SubscriberState};
use crate::ws::WsConnector;

/// How a followed job ended, as far as this subscriber saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        result: String,
    },
    /// The job failed and its charge was refunded.
    Failed {
        kind: Option<FailureKind>,
        message: Option<String>,
    },
    /// Stopped locally before the job finished.
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("Could not subscribe to job {job_id}: {source}")]
    Connect {
        job_id: JobId,
        #[source]
        source: ChannelError,
    },

    /// Nothing was created or charged.
    #[error("Subscription to job {job_id} was not acknowledged within {timeout:?}")]
    AckTimeout { job_id: JobId, timeout: Duration },

    /// The API refused the job; nothing was charged.
    #[error("Job {job_id} was not created: {source}")]
    Rejected {
        job_id: JobId,
        #[source]
        source: ApiClientError,
    },

    /// The create request failed without a definite answer, so the job
    /// may exist and be charged. Check it with
    /// [`ProgressSubscriber::job_status`].
    #[error("Creation of job {job_id} is unconfirmed: {source}")]
    CreationUnknown {
        job_id: JobId,
        #[source]
        source: ApiClientError,
    },

    /// The channel failed. If `created` is set the job exists and may
    /// still finish; its status has to be checked separately.
    #[error("Lost connection to job {job_id}: {reason}")]
    ConnectionLost {
        job_id: JobId,
        reason: String,
        created: bool,
    },
}

enum Creation {
    Confirmed,
    Unconfirmed,
    Cancelled,
}

enum Ack {
    Received,
    Cancelled,
    TimedOut,
    Lost(String),
}

pub struct ProgressSubscriber {
    connector: Arc<dyn JobConnector>,
    api: Arc<dyn JobsApi>,
    ack_timeout: Duration,
    reconnect: ReconnectConfig,
    progress: watch::Sender<Option<ProgressSnapshot>>,
}

impl ProgressSubscriber {
    pub fn new(
        connector: Arc<dyn JobConnector>,
        api: Arc<dyn JobsApi>,
        config: &ClientConfig,
    ) -> Self {
        let (progress, _) = watch::channel(None);
        Self {
            connector,
            api,
            ack_timeout: config.ack_timeout,
            reconnect: config.reconnect.clone(),
            progress,
        }
    }

    /// Subscriber over WebSocket and HTTP for `config`.
    pub fn connect(config: &ClientConfig) -> Result<Self, ApiClientError> {
        let api = HttpJobsApi::new(config)?;
        Ok(Self::new(
            Arc::new(WsConnector::new(config.clone())),
            Arc::new(api),
            config,
        ))
    }

    /// Receive every snapshot published by [`run`](Self::run).
    pub fn progress(&self) -> watch::Receiver<Option<ProgressSnapshot>> {
        self.progress.subscribe()
    }

    /// Ask the server to cancel a job. The worker stops at its next check
    /// and the charge is refunded.
    pub async fn request_cancellation(&self, job_id: JobId) -> Result<JobView, ApiClientError> {
        self.api.request_cancellation(job_id).await
    }

    /// Check a job's status without subscribing, e.g. after
    /// [`SubscribeError::ConnectionLost`].
    pub async fn job_status(&self, job_id: JobId) -> Result<JobView, ApiClientError> {
        self.api.job_status(job_id).await
    }

    /// Subscribe to `job_id`, create it from `request`, and follow it to a
    /// terminal state.
    ///
    /// Cancelling `cancel` stops following the job at any point and returns
    /// [`JobOutcome::Cancelled`]; it never cancels the job itself.
    pub async fn run(
        &self,
        job_id: JobId,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, SubscribeError> {
        let mut tracker = ProgressTracker::new(job_id);
        self.publish(&tracker);

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = self.connector.open(job_id) => Some(opened),
        };
        let mut channel = match opened {
            None => return Ok(self.cancelled(&mut tracker)),
            Some(Ok(channel)) => channel,
            Some(Err(source)) => {
                tracker.disconnect(source.to_string());
                self.publish(&tracker);
                return Err(SubscribeError::Connect { job_id, source });
            }
        };

        match self.await_ack(channel.as_mut(), job_id, &cancel).await {
            Ack::Received => {
                tracker.acknowledge(job_id);
                self.publish(&tracker);
            }
            Ack::Cancelled => {
                channel.close().await;
                return Ok(self.cancelled(&mut tracker));
            }
            Ack::TimedOut => {
                channel.close().await;
                tracker.disconnect("subscription was not acknowledged");
                self.publish(&tracker);
                return Err(SubscribeError::AckTimeout {
                    job_id,
                    timeout: self.ack_timeout,
                });
            }
            Ack::Lost(reason) => {
                tracker.disconnect(reason.clone());
                self.publish(&tracker);
                return Err(SubscribeError::ConnectionLost {
                    job_id,
                    reason,
                    created: false,
                });
            }
        }

        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            created = self.api.create_job(job_id, request) => Some(created),
        };
        match created {
            None => {
                channel.close().await;
                return Ok(self.cancelled(&mut tracker));
            }
            Some(Ok(receipt)) => {
                tracing::info!(
                    job_id = %job_id,
                    cost = receipt.cost,
                    new_balance = receipt.new_balance,
                    "Job created"
                );
            }
            Some(Err(source)) if source.is_refusal() => {
                tracing::warn!(job_id = %job_id, error = %source, "Job creation rejected");
                channel.close().await;
                tracker.reject(source.to_string());
                self.publish(&tracker);
                return Err(SubscribeError::Rejected { job_id, source });
            }
            Some(Err(source)) => {
                tracing::warn!(job_id = %job_id, error = %source, "Job creation unconfirmed, checking status");
                match self.confirm_created(job_id, &cancel).await {
                    Creation::Confirmed => {
                        tracing::info!(job_id = %job_id, "Job exists, following it");
                    }
                    Creation::Cancelled => {
                        channel.close().await;
                        return Ok(self.cancelled(&mut tracker));
                    }
                    Creation::Unconfirmed => {
                        channel.close().await;
                        tracker.disconnect(source.to_string());
                        self.publish(&tracker);
                        return Err(SubscribeError::CreationUnknown { job_id, source });
                    }
                }
            }
        }

        self.follow(channel, &mut tracker, &cancel).await
    }

    /// Stream updates until the tracker reaches a terminal state.
    async fn follow(
        &self,
        mut channel: Box<dyn JobChannel>,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, SubscribeError> {
        let job_id = tracker.job_id();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = channel.next_message() => Some(next),
            };
            let Some(next) = next else {
                channel.close().await;
                return Ok(self.cancelled(tracker));
            };

            let reason = match next {
                Ok(Some(message)) => {
                    match tracker.apply(&message) {
                        Applied::Ignored => {}
                        Applied::Changed => self.publish(tracker),
                        Applied::Finished => {
                            self.publish(tracker);
                            channel.close().await;
                            return Self::outcome(tracker);
                        }
                    }
                    continue;
                }
                Ok(None) => "server closed the subscription".to_string(),
                Err(e) => e.to_string(),
            };

            tracing::warn!(job_id = %job_id, reason = %reason, "Job subscription dropped");
            match self.reopen(job_id, cancel).await {
                Some(reopened) => channel = reopened,
                None if cancel.is_cancelled() => return Ok(self.cancelled(tracker)),
                None => {
                    tracker.disconnect(reason.clone());
                    self.publish(tracker);
                    return Err(SubscribeError::ConnectionLost {
                        job_id,
                        reason,
                        created: true,
                    });
                }
            }
        }
    }

    /// Wait for the `subscribed` message for `job_id`.
    async fn await_ack(
        &self,
        channel: &mut dyn JobChannel,
        job_id: JobId,
        cancel: &CancellationToken,
    ) -> Ack {
        let wait = async {
            loop {
                match channel.next_message().await {
                    Ok(Some(JobChannelMessage::Subscribed { job_id: acked })) if acked == job_id => {
                        return Ack::Received;
                    }
                    Ok(Some(JobChannelMessage::Error { message })) => return Ack::Lost(message),
                    Ok(Some(_)) => continue,
                    Ok(None) => {
                        return Ack::Lost("closed before acknowledging the subscription".into())
                    }
                    Err(e) => return Ack::Lost(e.to_string()),
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ack::Cancelled,
            ack = tokio::time::timeout(self.ack_timeout, wait) => ack.unwrap_or(Ack::TimedOut),
        }
    }

    /// After a create request with no definite answer, ask the API whether
    /// the job exists. The open channel has been buffering its updates.
    async fn confirm_created(&self, job_id: JobId, cancel: &CancellationToken) -> Creation {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Creation::Cancelled,
            status = self.api.job_status(job_id) => status,
        };
        match status {
            Ok(_) => Creation::Confirmed,
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Job status check failed");
                Creation::Unconfirmed
            }
        }
    }

    /// Re-open a dropped channel. The server's snapshot after the new
    /// acknowledgment brings the tracker up to date.
    async fn reopen(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
    ) -> Option<Box<dyn JobChannel>> {
        let mut channel =
            reconnect_loop(self.connector.as_ref(), job_id, &self.reconnect, cancel).await?;

        match self.await_ack(channel.as_mut(), job_id, cancel).await {
            Ack::Received => Some(channel),
            _ => {
                tracing::warn!(job_id = %job_id, "Reopened subscription was not acknowledged");
                channel.close().await;
                None
            }
        }
    }

    fn outcome(tracker: &ProgressTracker) -> Result<JobOutcome, SubscribeError> {
        let job_id = tracker.job_id();
        let (kind, message) = tracker.failure();

        match tracker.state() {
            SubscriberState::Completed => Ok(JobOutcome::Completed {
                result: tracker.result().unwrap_or_default().to_string(),
            }),
            SubscriberState::Failed => Ok(JobOutcome::Failed {
                kind,
                message: message.map(str::to_string),
            }),
            SubscriberState::Cancelled => Ok(JobOutcome::Cancelled),
            _ => Err(SubscribeError::ConnectionLost {
                job_id,
                reason: message.unwrap_or("subscription ended").to_string(),
                created: true,
            }),
        }
    }

    fn cancelled(&self, tracker: &mut ProgressTracker) -> JobOutcome {
        if tracker.cancel() {
            tracing::info!(job_id = %tracker.job_id(), "Stopped following job");
            self.publish(tracker);
        }
        JobOutcome::Cancelled
    }

    fn publish(&self, tracker: &ProgressTracker) {
        self.progress.send_replace(Some(tracker.snapshot()));
    }
}
