use std::sync::Arc;

use atelier_pipeline::Worker;
use tokio_util::task::TaskTracker;

/// Shared state for the worker service's handlers.
#[derive(Clone)]
pub struct WorkerState {
    pub worker: Arc<Worker>,
    /// Detached job runs, awaited (with a timeout) on shutdown.
    pub runs: TaskTracker,
}

impl WorkerState {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self {
            worker,
            runs: TaskTracker::new(),
        }
    }
}
