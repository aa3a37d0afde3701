//! Repository for the `balances` and `ledger_entries` tables.
//!
//! Every balance movement is written as a ledger entry in the same
//! transaction as the balance update. The partial unique index on
//! `(job_id, kind)` is what makes debits and refunds once-per-job; the
//! balance itself is only ever changed with relative `UPDATE`s.

use atelier_core::types::{JobId, UserId};
use sqlx::{PgPool, Postgres, Transaction};

/// Result of [`LedgerRepo::debit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { balance: i64 },
    Insufficient { balance: i64 },
    AlreadyCharged,
}

/// Result of [`LedgerRepo::refund`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded { amount: i64, balance: i64 },
    AlreadyRefunded,
    NoCharge,
}

/// Provides the balance ledger queries.
pub struct LedgerRepo;

impl LedgerRepo {
    /// Current balance; owners without a row have zero.
    pub async fn balance(pool: &PgPool, owner: UserId) -> Result<i64, sqlx::Error> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM balances WHERE owner = $1")
                .bind(owner)
                .fetch_optional(pool)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    /// Charge `amount` to `owner` for `job_id` if the balance covers it.
    pub async fn debit(
        pool: &PgPool,
        owner: UserId,
        job_id: JobId,
        amount: i64,
    ) -> Result<DebitOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        if !Self::insert_entry(&mut tx, owner, Some(job_id), "debit", amount).await? {
            return Ok(DebitOutcome::AlreadyCharged);
        }

        let balance: Option<i64> = sqlx::query_scalar(
            "UPDATE balances \
             SET balance = balance - $2, updated_at = NOW() \
             WHERE owner = $1 AND balance >= $2 \
             RETURNING balance",
        )
        .bind(owner)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        match balance {
            Some(balance) => {
                tx.commit().await?;
                Ok(DebitOutcome::Debited { balance })
            }
            None => {
                // Dropping the entry along with the transaction.
                tx.rollback().await?;
                let balance = Self::balance(pool, owner).await?;
                Ok(DebitOutcome::Insufficient { balance })
            }
        }
    }

    /// Credit back exactly what `job_id` was charged, once.
    pub async fn refund(
        pool: &PgPool,
        owner: UserId,
        job_id: JobId,
    ) -> Result<RefundOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let charged: Option<i64> = sqlx::query_scalar(
            "SELECT amount FROM ledger_entries \
             WHERE job_id = $1 AND owner = $2 AND kind = 'debit'",
        )
        .bind(job_id.as_uuid())
        .bind(owner)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(amount) = charged else {
            return Ok(RefundOutcome::NoCharge);
        };

        if !Self::insert_entry(&mut tx, owner, Some(job_id), "refund", amount).await? {
            return Ok(RefundOutcome::AlreadyRefunded);
        }

        let balance = Self::credit(&mut tx, owner, amount).await?;
        tx.commit().await?;
        Ok(RefundOutcome::Refunded { amount, balance })
    }

    /// Add credits outside of any job.
    pub async fn grant(pool: &PgPool, owner: UserId, amount: i64) -> Result<i64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        Self::insert_entry(&mut tx, owner, None, "grant", amount).await?;
        let balance = Self::credit(&mut tx, owner, amount).await?;
        tx.commit().await?;
        Ok(balance)
    }

    // -- Helpers --

    /// Append a ledger entry. Returns `false` if an entry of the same kind
    /// already exists for the job.
    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        owner: UserId,
        job_id: Option<JobId>,
        kind: &str,
        amount: i64,
    ) -> Result<bool, sqlx::Error> {
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO ledger_entries (owner, job_id, kind, amount) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (job_id, kind) WHERE job_id IS NOT NULL DO NOTHING \
             RETURNING id",
        )
        .bind(owner)
        .bind(job_id.map(|id| id.as_uuid()))
        .bind(kind)
        .bind(amount)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(id.is_some())
    }

    async fn credit(
        tx: &mut Transaction<'_, Postgres>,
        owner: UserId,
        amount: i64,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO balances (owner, balance) VALUES ($1, $2) \
             ON CONFLICT (owner) DO UPDATE \
             SET balance = balances.balance + EXCLUDED.balance, updated_at = NOW() \
             RETURNING balance",
        )
        .bind(owner)
        .bind(amount)
        .fetch_one(&mut **tx)
        .await
    }
}
