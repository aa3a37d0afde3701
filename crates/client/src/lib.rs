//! Progress Subscriber for Atelier generation jobs.
//!
//! A caller mints a [`JobId`](atelier_core::types::JobId), and
//! [`ProgressSubscriber::run`] opens the job's notification channel, waits
//! for the server's acknowledgment, and only then asks the API to create
//! (and charge for) the job. Updates are folded into a
//! [`ProgressTracker`], whose snapshots are published on a
//! `tokio::sync::watch` channel for display.
//!
//! - [`tracker`]: the pure state machine.
//! - [`channel`]: the notification channel seam.
//! - [`ws`]: WebSocket implementation of that seam.
//! - [`http`]: job creation, status and cancellation over HTTP.
//! - [`reconnect`]: backoff for re-opening a dropped channel.

pub mod channel;
pub mod config;
pub mod http;
pub mod reconnect;
pub mod subscriber;
pub mod tracker;
pub mod ws;

pub use channel::{ChannelError, JobChannel, JobConnector};
pub use config::ClientConfig;
pub use http::{ApiClientError, CreatedJob, HttpJobsApi, JobsApi};
pub use subscriber::{JobOutcome, ProgressSubscriber, SubscribeError};
pub use tracker::{ProgressSnapshot, ProgressTracker, SubscriberState};
pub use ws::{WsConnector, WsJobChannel};
