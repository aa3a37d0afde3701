//! Out-of-process worker service.
//!
//! Accepts fire-and-forget `POST /run { job_id }` triggers from the API and
//! runs each job on a detached task. Everything the worker produces goes
//! through the shared job store.

pub mod config;
pub mod routes;
pub mod state;
