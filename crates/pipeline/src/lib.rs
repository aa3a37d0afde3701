//! Generation job orchestration.
//!
//! - [`spawner`]: validates a request, debits the ledger, creates the job
//!   record and fires the worker trigger.
//! - [`worker`]: executes a job's [`plan`] against a
//!   [`backend::GenerationBackend`], writing progress into the store and
//!   refunding on failure.
//! - [`trigger`]: fire-and-forget hand-off from spawner to worker.
//! - [`reconcile`]: sweep that fails and refunds jobs stuck past their
//!   deadline.

pub mod backend;
pub mod plan;
pub mod reconcile;
pub mod refund;
pub mod spawner;
pub mod trigger;
pub mod worker;

pub use backend::{Artifact, BackendError, GenerationBackend, HttpBackend};
pub use reconcile::{reconcile_stale, SweepReport};
pub use spawner::{JobSpawner, SpawnError, SpawnReceipt};
pub use trigger::{HttpTrigger, InProcessTrigger, WorkerTrigger, WorkerTriggerError};
pub use worker::{Worker, WorkerOutcome};
