//! Domain model for generation jobs.
//!
//! Everything that both sides of the job protocol agree on lives here:
//! identifiers, the job state machine, the structured progress protocol,
//! generation requests and their cost, the wire messages streamed to
//! subscribers, and the store/ledger seams implemented by `atelier-db`.

pub mod error;
pub mod job;
pub mod job_events;
pub mod ledger;
pub mod progress;
pub mod request;
pub mod store;
pub mod types;
