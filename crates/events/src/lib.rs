//! Job change notification infrastructure.
//!
//! - [`JobFeed`]: in-process publish/subscribe hub with one
//!   `tokio::sync::broadcast` topic per job id.
//! - [`pg_relay`]: background task that turns PostgreSQL
//!   `NOTIFY job_changes` into feed publications.

pub mod feed;
pub mod pg_relay;

pub use feed::{JobFeed, JobSubscription};
