use atelier_core::error::CoreError;
use atelier_core::ledger::LedgerError;
use atelier_core::store::StoreError;
use atelier_pipeline::SpawnError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain errors of the layers below and implements
/// [`IntoResponse`] to produce `{ "error": ..., "code": ... }` bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

type Classified = (StatusCode, &'static str, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core(core),
            AppError::Spawn(err) => classify_spawn(err),
            AppError::Store(err) => classify_store(err),
            AppError::Ledger(err) => classify_ledger(err),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> Classified {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core(err: &CoreError) -> Classified {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
        CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

fn insufficient_balance(balance: i64, required: i64) -> Classified {
    (
        StatusCode::PAYMENT_REQUIRED,
        "INSUFFICIENT_BALANCE",
        format!("Insufficient balance: {required} credits required, {balance} available"),
    )
}

/// - Invalid request: 400.
/// - Insufficient balance: 402, nothing was charged.
/// - Duplicate job id: 409.
/// - Record creation failure: 500 stating whether the charge was restored.
fn classify_spawn(err: &SpawnError) -> Classified {
    match err {
        SpawnError::Invalid(core) => classify_core(core),
        SpawnError::InsufficientBalance { balance, required } => {
            insufficient_balance(*balance, *required)
        }
        SpawnError::Duplicate(job_id) => (
            StatusCode::CONFLICT,
            "DUPLICATE_JOB",
            format!("Job {job_id} already exists"),
        ),
        SpawnError::JobCreation {
            job_id,
            source,
            refunded,
        } => {
            tracing::error!(job_id = %job_id, error = %source, refunded, "Job creation failed");
            let message = if *refunded {
                "The job could not be created; your credits were restored"
            } else {
                "The job could not be created; your credits will be restored"
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "JOB_CREATION_FAILED",
                message.to_string(),
            )
        }
        SpawnError::Ledger(err) => classify_ledger(err),
    }
}

fn classify_store(err: &StoreError) -> Classified {
    match err {
        StoreError::NotFound(job_id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Job with id {job_id} not found"),
        ),
        StoreError::Duplicate(job_id) => (
            StatusCode::CONFLICT,
            "DUPLICATE_JOB",
            format!("Job {job_id} already exists"),
        ),
        StoreError::InvalidTransition { job_id, from, .. } => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Job {job_id} is already {from}"),
        ),
        StoreError::Backend(msg) => {
            tracing::error!(error = %msg, "Job store error");
            internal()
        }
    }
}

fn classify_ledger(err: &LedgerError) -> Classified {
    match err {
        LedgerError::InsufficientBalance { balance, required } => {
            insufficient_balance(*balance, *required)
        }
        LedgerError::DuplicateCharge(job_id) => (
            StatusCode::CONFLICT,
            "DUPLICATE_JOB",
            format!("Job {job_id} already exists"),
        ),
        LedgerError::InvalidAmount(amount) => (
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("Amount must be positive (got {amount})"),
        ),
        LedgerError::NoCharge(_) | LedgerError::Backend(_) => {
            tracing::error!(error = %err, "Ledger error");
            internal()
        }
    }
}
