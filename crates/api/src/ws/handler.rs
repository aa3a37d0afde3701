//! Per-job progress subscription over WebSocket.
//!
//! The server subscribes to the job's feed topic before it sends the
//! `subscribed` acknowledgment, so a client that waits for the ack before
//! creating the job cannot miss the creation event. After the ack the
//! current record (if any) is sent as a snapshot, followed by every
//! change in write order. The socket is closed after a terminal message.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::error::CoreError;
use atelier_core::job::JobView;
use atelier_core::job_events::{JobChange, JobChannelMessage};
use atelier_core::store::JobStore;
use atelier_core::types::{JobId, UserId};
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::state::AppState;
use crate::ws::manager::WsManager;

/// How long buffered outbound messages may take to flush after the
/// subscription ends.
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// GET /api/v1/ws/jobs/{job_id}
///
/// Upgrades to a WebSocket subscribed to one job. The job does not need
/// to exist yet; if it does, it must belong to the caller.
pub async fn job_ws_handler(
    ws: WebSocketUpgrade,
    auth: AuthUser,
    Path(job_id): Path<JobId>,
    State(state): State<AppState>,
) -> AppResult<Response> {
    if let Some(job) = state.store.get(job_id).await? {
        if job.owner != auth.user_id {
            return Err(AppError::Core(CoreError::Forbidden(
                "Cannot subscribe to another user's job".into(),
            )));
        }
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, auth.user_id, job_id)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// The subscription is over; close the socket from our side.
    Finished,
    /// The client went away.
    Disconnected,
}

/// Outbound half of one subscription.
struct Session {
    conn_id: String,
    job_id: JobId,
    user_id: UserId,
    ws_manager: Arc<WsManager>,
    last_sent: Option<JobView>,
}

impl Session {
    async fn send(&self, message: &JobChannelMessage) -> Flow {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to serialize job message");
                return Flow::Finished;
            }
        };
        if self
            .ws_manager
            .send(&self.conn_id, Message::Text(text.into()))
            .await
        {
            Flow::Continue
        } else {
            Flow::Disconnected
        }
    }

    async fn send_error(&self, message: &str) -> Flow {
        match self
            .send(&JobChannelMessage::Error {
                message: message.to_string(),
            })
            .await
        {
            Flow::Continue => Flow::Finished,
            other => other,
        }
    }

    /// Forward one change to the client.
    ///
    /// Updates that are identical to, or older than, the last one sent are
    /// skipped; they occur when a change queued before the snapshot read
    /// arrives after it.
    async fn forward(&mut self, change: &JobChange) -> Flow {
        if change.owner() != self.user_id {
            tracing::warn!(
                conn_id = %self.conn_id,
                job_id = %self.job_id,
                user_id = self.user_id,
                "Job created by another user on this subscription"
            );
            return self.send_error("Job belongs to another user").await;
        }

        let message = JobChannelMessage::from(change);
        if let JobChannelMessage::Update { job } = &message {
            if let Some(last) = &self.last_sent {
                if job == last || job.updated_at < last.updated_at {
                    return Flow::Continue;
                }
            }
            self.last_sent = Some(job.clone());
        }

        match self.send(&message).await {
            Flow::Continue if message.is_terminal() => Flow::Finished,
            flow => flow,
        }
    }

    /// Re-read the job and forward it: the initial snapshot, and recovery
    /// after the subscription lagged.
    async fn resync(&mut self, store: &dyn JobStore) -> Flow {
        match store.get(self.job_id).await {
            Ok(Some(job)) => self.forward(&JobChange::Updated(job)).await,
            // Removed while we were not looking.
            Ok(None) if self.last_sent.is_some() => {
                let deleted = JobChange::Deleted {
                    job_id: self.job_id,
                    owner: self.user_id,
                };
                self.forward(&deleted).await
            }
            Ok(None) => Flow::Continue,
            Err(e) => {
                tracing::error!(job_id = %self.job_id, error = %e, "Failed to read job for subscription");
                self.send_error("Job status is unavailable").await
            }
        }
    }
}

/// Drive one subscription from upgrade to close.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId, job_id: JobId) {
    let conn_id = uuid::Uuid::new_v4().to_string();

    // Must precede the ack.
    let mut subscription = state.feed.subscribe(job_id);
    let mut outbound = state
        .ws_manager
        .add(conn_id.clone(), user_id, job_id)
        .await;
    tracing::info!(conn_id = %conn_id, job_id = %job_id, user_id, "Job subscription opened");

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    let mut session = Session {
        conn_id: conn_id.clone(),
        job_id,
        user_id,
        ws_manager: Arc::clone(&state.ws_manager),
        last_sent: None,
    };

    let mut flow = session
        .send(&JobChannelMessage::Subscribed { job_id })
        .await;
    if flow == Flow::Continue {
        flow = session.resync(state.store.as_ref()).await;
    }

    while flow == Flow::Continue {
        flow = tokio::select! {
            received = subscription.recv() => match received {
                Ok(change) => session.forward(&change).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(conn_id = %conn_id, job_id = %job_id, skipped, "Job subscription lagged, resyncing");
                    session.resync(state.store.as_ref()).await
                }
                Err(RecvError::Closed) => {
                    // The topic ended without a terminal change reaching us.
                    match session.resync(state.store.as_ref()).await {
                        Flow::Continue => Flow::Finished,
                        other => other,
                    }
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => Flow::Disconnected,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(conn_id = %conn_id, "Pong received");
                    Flow::Continue
                }
                // Subscribers have nothing to say after the upgrade.
                Some(Ok(_)) => Flow::Continue,
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    Flow::Disconnected
                }
            },
        };
    }

    if flow == Flow::Finished {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::from_static("subscription finished"),
        };
        state
            .ws_manager
            .send(&conn_id, Message::Close(Some(frame)))
            .await;
    }

    // Dropping the manager's sender lets the send task drain and exit.
    state.ws_manager.remove(&conn_id).await;
    drop(subscription);
    if tokio::time::timeout(SEND_DRAIN_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }

    tracing::info!(conn_id = %conn_id, job_id = %job_id, ?flow, "Job subscription closed");
}
