//! Persistence for generation jobs and credit balances.
//!
//! - [`repositories`]: sqlx queries against the `jobs`, `balances` and
//!   `ledger_entries` tables.
//! - [`pg`]: [`PgJobStore`] and [`PgLedger`], the PostgreSQL
//!   implementations of the core store and ledger traits.
//! - [`memory`]: in-process implementations used when no database is
//!   configured, and by tests.

use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod models;
pub mod pg;
pub mod repositories;

pub use memory::{MemoryJobStore, MemoryLedger};
pub use pg::{PgJobStore, PgLedger};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations in `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
