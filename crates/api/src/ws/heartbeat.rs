use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::ws::manager::WsManager;

/// Ping every open subscription each `interval` so idle proxies keep the
/// sockets alive while a job sits in a long step.
///
/// Runs until the returned handle is aborted.
pub fn start_heartbeat(ws_manager: Arc<WsManager>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if ws_manager.connection_count().await == 0 {
                continue;
            }
            ws_manager.ping_all().await;
            tracing::trace!("Pinged job subscriptions");
        }
    })
}
