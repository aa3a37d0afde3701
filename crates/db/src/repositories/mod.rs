//! Repository layer: one zero-sized type per table, associated async
//! functions taking the pool explicitly.

pub mod job_repo;
pub mod ledger_repo;

pub use job_repo::JobRepo;
pub use ledger_repo::{DebitOutcome, LedgerRepo, RefundOutcome};
