//! Registry of open job subscriptions.
//!
//! Each subscription owns an unbounded outbound queue drained by its socket
//! task. Subscriptions are indexed both by connection id and by job, since
//! the heartbeat walks all of them while delivery looks them up per job.

use std::collections::{HashMap, HashSet};

use atelier_core::types::{JobId, Timestamp, UserId};
use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};

/// Outbound queue feeding one socket.
pub type WsSender = mpsc::UnboundedSender<Message>;

pub struct Subscription {
    pub user_id: UserId,
    pub job_id: JobId,
    pub outbound: WsSender,
    pub opened_at: Timestamp,
}

#[derive(Default)]
struct Registry {
    by_conn: HashMap<String, Subscription>,
    by_job: HashMap<JobId, HashSet<String>>,
}

impl Registry {
    fn insert(&mut self, conn_id: String, subscription: Subscription) {
        self.remove(&conn_id);
        self.by_job
            .entry(subscription.job_id)
            .or_default()
            .insert(conn_id.clone());
        self.by_conn.insert(conn_id, subscription);
    }

    fn remove(&mut self, conn_id: &str) -> Option<Subscription> {
        let subscription = self.by_conn.remove(conn_id)?;
        self.unindex(conn_id, subscription.job_id);
        Some(subscription)
    }

    fn unindex(&mut self, conn_id: &str, job_id: JobId) {
        if let Some(conns) = self.by_job.get_mut(&job_id) {
            conns.remove(conn_id);
            if conns.is_empty() {
                self.by_job.remove(&job_id);
            }
        }
    }
}

/// Shared as `Arc<WsManager>` through [`AppState`](crate::state::AppState).
#[derive(Default)]
pub struct WsManager {
    registry: RwLock<Registry>,
}

impl WsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn_id` as a subscriber to `job_id`.
    ///
    /// The returned receiver yields whatever is queued through [`send`] and
    /// ends once the subscription is removed and the queue is drained.
    ///
    /// [`send`]: WsManager::send
    pub async fn add(
        &self,
        conn_id: String,
        user_id: UserId,
        job_id: JobId,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (outbound, rx) = mpsc::unbounded_channel();
        self.registry.write().await.insert(
            conn_id,
            Subscription {
                user_id,
                job_id,
                outbound,
                opened_at: chrono::Utc::now(),
            },
        );
        rx
    }

    pub async fn remove(&self, conn_id: &str) {
        if let Some(subscription) = self.registry.write().await.remove(conn_id) {
            let open_for = chrono::Utc::now() - subscription.opened_at;
            tracing::trace!(
                conn_id,
                job_id = %subscription.job_id,
                open_ms = open_for.num_milliseconds(),
                "Subscription unregistered"
            );
        }
    }

    /// Queue `message` for one subscription. `false` when it is gone.
    pub async fn send(&self, conn_id: &str, message: Message) -> bool {
        match self.registry.read().await.by_conn.get(conn_id) {
            Some(subscription) => subscription.outbound.send(message).is_ok(),
            None => false,
        }
    }

    pub async fn connections_for_job(&self, job_id: JobId) -> Vec<String> {
        self.registry
            .read()
            .await
            .by_job
            .get(&job_id)
            .map(|conns| conns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.by_conn.len()
    }

    /// Close every subscription and forget them all. Runs at shutdown.
    pub async fn shutdown_all(&self) {
        let mut registry = self.registry.write().await;
        let closed = broadcast(&registry, || Message::Close(None));
        *registry = Registry::default();
        tracing::info!(count = closed, "Closed all job subscriptions");
    }

    pub async fn ping_all(&self) {
        broadcast(&*self.registry.read().await, || Message::Ping(Bytes::new()));
    }
}

/// Queue a fresh frame on every subscription; returns how many accepted it.
fn broadcast(registry: &Registry, frame: impl Fn() -> Message) -> usize {
    registry
        .by_conn
        .values()
        .filter(|subscription| subscription.outbound.send(frame()).is_ok())
        .count()
}
