use std::sync::Arc;

use atelier_core::ledger::BalanceLedger;
use atelier_core::store::JobStore;
use atelier_db::DbPool;
use atelier_events::JobFeed;
use atelier_pipeline::JobSpawner;

use crate::auth::jwt::TokenAuthority;
use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database pool when running against PostgreSQL; `None` in in-memory mode.
    pub pool: Option<DbPool>,
    pub store: Arc<dyn JobStore>,
    pub ledger: Arc<dyn BalanceLedger>,
    /// Per-job change notifications, fed by the store (in-memory mode) or
    /// by the PostgreSQL relay.
    pub feed: Arc<JobFeed>,
    pub spawner: Arc<JobSpawner>,
    pub config: Arc<ServerConfig>,
    /// Verifies bearer tokens; built once from `config.jwt`.
    pub tokens: Arc<TokenAuthority>,
    /// Open job subscriptions.
    pub ws_manager: Arc<WsManager>,
}
