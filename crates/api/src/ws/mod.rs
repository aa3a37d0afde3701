//! WebSocket infrastructure for per-job progress subscriptions.
//!
//! Provides connection management, heartbeat pings, and the upgrade
//! handler mounted at `/api/v1/ws/jobs/{job_id}`.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::job_ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
