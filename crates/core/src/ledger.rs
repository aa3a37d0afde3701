//! The balance ledger seam.
//!
//! Debits and refunds are keyed by job so that a job is charged at most
//! once and refunded at most once, whichever component attempts it.

use async_trait::async_trait;

use crate::types::{JobId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient balance: {required} required, {balance} available")]
    InsufficientBalance { balance: i64, required: i64 },

    /// The job has already been charged.
    #[error("Job {0} has already been charged")]
    DuplicateCharge(JobId),

    /// A refund was requested for a job that was never charged.
    #[error("Job {0} has no charge to refund")]
    NoCharge(JobId),

    #[error("Amount must be positive (got {0})")]
    InvalidAmount(i64),

    #[error("Ledger backend error: {0}")]
    Backend(String),
}

/// Outcome of [`BalanceLedger::refund`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refund {
    /// `amount` was credited back; the owner's balance is now `balance`.
    Applied { amount: i64, balance: i64 },
    /// An earlier refund for the same job already went through.
    AlreadyRefunded,
}

#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Current balance; users without a ledger row have zero.
    async fn balance(&self, owner: UserId) -> Result<i64, LedgerError>;

    /// Atomically subtract `amount` if the balance covers it. Returns the
    /// new balance.
    async fn debit(&self, owner: UserId, job_id: JobId, amount: i64) -> Result<i64, LedgerError>;

    /// Credit back exactly what `job_id` was charged.
    async fn refund(&self, owner: UserId, job_id: JobId) -> Result<Refund, LedgerError>;

    /// Add credits outside of any job (top-ups, grants).
    async fn grant(&self, owner: UserId, amount: i64) -> Result<i64, LedgerError>;
}
