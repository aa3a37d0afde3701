//! Client-side progress state machine.
//!
//! [`ProgressTracker`] folds [`JobChannelMessage`]s for one job into a
//! [`ProgressSnapshot`]. It does no I/O, so every transition is testable
//! without a server.
//!
//! ```text
//! Initializing ──ack──▶ Streaming ──result──────▶ Completed
//!      │                    │──failed / delete──▶ Failed
//!      │                    │──server error─────▶ Disconnected
//!      └──── cancel / channel loss / rejection ──▶ Cancelled / Disconnected / Rejected
//! ```
//!
//! Once a terminal state is reached every later message is ignored.

use atelier_core::job::{FailureKind, JobStatus};
use atelier_core::job_events::JobChannelMessage;
use atelier_core::progress::{Progress, COMPLETE_PERCENT};
use atelier_core::types::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Waiting for the subscription acknowledgment.
    Initializing,
    Streaming,
    Completed,
    /// The job failed; its charge is refunded server-side.
    Failed,
    /// Stopped locally. The job itself may still be running.
    Cancelled,
    /// The notification channel failed. Says nothing about the job.
    Disconnected,
    /// The API refused to create the job; nothing was charged.
    Rejected,
}

impl SubscriberState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SubscriberState::Initializing | SubscriberState::Streaming)
    }
}

/// What the tracker did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Wrong job, already terminal, or nothing new.
    Ignored,
    Changed,
    /// The message moved the tracker into a terminal state.
    Finished,
}

/// Point-in-time view of a subscription, published for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub state: SubscriberState,
    /// Never decreases while the subscription is alive.
    pub percent: u8,
    pub progress: Option<Progress>,
    /// Last server-side status seen, if any update arrived.
    pub job_status: Option<JobStatus>,
    pub result: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub failure_message: Option<String>,
}

impl ProgressSnapshot {
    /// One line of text for a progress display.
    pub fn headline(&self) -> String {
        match self.state {
            SubscriberState::Initializing => "Connecting".to_string(),
            SubscriberState::Streaming => match (&self.progress, self.job_status) {
                (_, Some(JobStatus::CancellationRequested)) => "Cancelling".to_string(),
                (Some(progress), _) => progress.to_string(),
                (None, _) => "Waiting for a worker".to_string(),
            },
            SubscriberState::Completed => "Done".to_string(),
            SubscriberState::Failed => match self.failure_kind {
                Some(FailureKind::Cancelled) => {
                    "Cancelled, your credits have been restored".to_string()
                }
                _ => "Generation failed, your credits have been restored".to_string(),
            },
            SubscriberState::Cancelled => "Stopped following this job".to_string(),
            SubscriberState::Disconnected => {
                "Lost connection, check the job status later".to_string()
            }
            SubscriberState::Rejected => "Job was not created".to_string(),
        }
    }
}

pub struct ProgressTracker {
    job_id: JobId,
    state: SubscriberState,
    percent: u8,
    progress: Option<Progress>,
    job_status: Option<JobStatus>,
    result: Option<String>,
    failure_kind: Option<FailureKind>,
    failure_message: Option<String>,
}

impl ProgressTracker {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: SubscriberState::Initializing,
            percent: 0,
            progress: None,
            job_status: None,
            result: None,
            failure_kind: None,
            failure_message: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn state(&self) -> SubscriberState {
        self.state
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn failure(&self) -> (Option<FailureKind>, Option<&str>) {
        (self.failure_kind, self.failure_message.as_deref())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: self.job_id,
            state: self.state,
            percent: self.percent,
            progress: self.progress.clone(),
            job_status: self.job_status,
            result: self.result.clone(),
            failure_kind: self.failure_kind,
            failure_message: self.failure_message.clone(),
        }
    }

    /// Fold one server message into the tracker.
    pub fn apply(&mut self, message: &JobChannelMessage) -> Applied {
        if self.is_terminal() {
            return Applied::Ignored;
        }

        match message {
            JobChannelMessage::Subscribed { job_id } => self.acknowledge(*job_id),
            JobChannelMessage::Error { message } => {
                self.failure_message = Some(message.clone());
                self.state = SubscriberState::Disconnected;
                Applied::Finished
            }
            // No job data is expected before the acknowledgment.
            _ if self.state == SubscriberState::Initializing => Applied::Ignored,
            JobChannelMessage::Update { job } => {
                if job.job_id != self.job_id {
                    return Applied::Ignored;
                }
                self.job_status = Some(job.status);

                if let Some(result) = &job.result {
                    self.result = Some(result.clone());
                    self.percent = COMPLETE_PERCENT;
                    self.state = SubscriberState::Completed;
                    return Applied::Finished;
                }

                if job.status == JobStatus::Failed {
                    self.failure_kind = job.failure_kind;
                    self.failure_message = job.failure_message.clone();
                    self.state = SubscriberState::Failed;
                    return Applied::Finished;
                }

                // A stale report never replaces a later one, so the headline
                // and the percentage cannot move backwards.
                if let Some(progress) = job.effective_progress() {
                    if progress.percent() >= self.percent {
                        self.percent = progress.percent();
                        self.progress = Some(progress);
                    }
                }
                Applied::Changed
            }
            JobChannelMessage::Delete { job_id } => {
                if *job_id != self.job_id {
                    return Applied::Ignored;
                }
                self.failure_message = Some("Job was removed".to_string());
                self.state = SubscriberState::Failed;
                Applied::Finished
            }
        }
    }

    /// Handle a subscription acknowledgment. Repeated acks after a
    /// reconnect are accepted without changing state.
    pub fn acknowledge(&mut self, job_id: JobId) -> Applied {
        if job_id != self.job_id || self.is_terminal() {
            return Applied::Ignored;
        }
        if self.state == SubscriberState::Initializing {
            self.state = SubscriberState::Streaming;
            return Applied::Changed;
        }
        Applied::Ignored
    }

    /// Stop following the job locally. Returns `false` if already terminal.
    pub fn cancel(&mut self) -> bool {
        self.finish(SubscriberState::Cancelled)
    }

    pub fn disconnect(&mut self, reason: impl Into<String>) -> bool {
        let finished = self.finish(SubscriberState::Disconnected);
        if finished {
            self.failure_message = Some(reason.into());
        }
        finished
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> bool {
        let finished = self.finish(SubscriberState::Rejected);
        if finished {
            self.failure_message = Some(reason.into());
        }
        finished
    }

    fn finish(&mut self, state: SubscriberState) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = state;
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use atelier_core::job::JobView;
    use atelier_core::progress::Phase;

    use super::*;

    fn view(job_id: JobId, status: JobStatus, progress: Option<Progress>) -> JobView {
        JobView {
            job_id,
            status,
            cost: 4,
            percent: progress.as_ref().map_or(0, Progress::percent),
            progress_message: progress.as_ref().map(ToString::to_string),
            progress,
            result: None,
            failure_kind: None,
            failure_message: None,
            updated_at: chrono::Utc::now(),
        }
    }

    fn update(job_id: JobId, progress: Progress) -> JobChannelMessage {
        JobChannelMessage::Update {
            job: view(job_id, JobStatus::Running, Some(progress)),
        }
    }

    fn streaming() -> ProgressTracker {
        let mut tracker = ProgressTracker::new(JobId::new());
        tracker.acknowledge(tracker.job_id());
        tracker
    }

    #[test]
    fn ack_moves_to_streaming() {
        let id = JobId::new();
        let mut tracker = ProgressTracker::new(id);

        let applied = tracker.apply(&JobChannelMessage::Subscribed { job_id: id });

        assert_eq!(applied, Applied::Changed);
        assert_eq!(tracker.state(), SubscriberState::Streaming);
    }

    #[test]
    fn ack_for_other_job_is_ignored() {
        let mut tracker = ProgressTracker::new(JobId::new());

        let applied = tracker.apply(&JobChannelMessage::Subscribed {
            job_id: JobId::new(),
        });

        assert_eq!(applied, Applied::Ignored);
        assert_eq!(tracker.state(), SubscriberState::Initializing);
    }

    #[test]
    fn updates_before_ack_are_ignored() {
        let id = JobId::new();
        let mut tracker = ProgressTracker::new(id);

        assert_eq!(tracker.apply(&update(id, Progress::steps(1, 3))), Applied::Ignored);
        assert_eq!(tracker.percent(), 0);
    }

    #[test]
    fn countable_and_named_progress_raise_percent() {
        let mut tracker = streaming();
        let id = tracker.job_id();

        tracker.apply(&update(id, Progress::phase(Phase::Initializing)));
        assert_eq!(tracker.percent(), 5);
        tracker.apply(&update(id, Progress::steps(1, 3)));
        assert_eq!(tracker.percent(), 33);
        tracker.apply(&update(id, Progress::steps(3, 3)));
        assert_eq!(tracker.percent(), 80);
        tracker.apply(&update(id, Progress::phase(Phase::Compositing)));
        assert_eq!(tracker.percent(), 92);
    }

    #[test]
    fn percent_never_decreases() {
        let mut tracker = streaming();
        let id = tracker.job_id();

        tracker.apply(&update(id, Progress::steps(2, 3)));
        let high = tracker.percent();
        tracker.apply(&update(id, Progress::steps(1, 3)));
        tracker.apply(&update(id, Progress::Raw { message: "warming up".into() }));

        assert_eq!(tracker.percent(), high);
        assert_eq!(tracker.state(), SubscriberState::Streaming);
    }

    #[test]
    fn stale_step_report_keeps_the_later_headline() {
        let mut tracker = streaming();
        let id = tracker.job_id();

        tracker.apply(&update(id, Progress::steps(2, 3)));
        tracker.apply(&update(id, Progress::steps(1, 3)));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.percent, 56);
        assert_eq!(snapshot.progress, Some(Progress::steps(2, 3)));
        assert_eq!(snapshot.headline(), "2/3 steps");
    }

    #[test]
    fn stale_step_report_after_compositing_is_dropped() {
        let mut tracker = streaming();
        let id = tracker.job_id();

        tracker.apply(&update(id, Progress::phase(Phase::Compositing)));
        tracker.apply(&update(id, Progress::steps(3, 3)));

        assert_eq!(tracker.percent(), 92);
        assert_eq!(tracker.snapshot().headline(), "compositing");
    }

    #[test]
    fn duplicate_report_leaves_percent_unchanged() {
        let mut tracker = streaming();
        let id = tracker.job_id();

        tracker.apply(&update(id, Progress::steps(1, 3)));
        let before = tracker.snapshot();
        tracker.apply(&update(id, Progress::steps(1, 3)));

        assert_eq!(tracker.percent(), before.percent);
        assert_eq!(tracker.snapshot().progress, before.progress);
    }

    #[test]
    fn legacy_message_only_updates_are_parsed() {
        let mut tracker = streaming();
        let id = tracker.job_id();
        let mut job = view(id, JobStatus::Running, None);
        job.progress_message = Some("2/3 steps".into());

        tracker.apply(&JobChannelMessage::Update { job });

        assert_eq!(tracker.snapshot().progress, Some(Progress::steps(2, 3)));
        assert_eq!(tracker.percent(), 56);
    }

    #[test]
    fn result_completes_at_full_percent() {
        let mut tracker = streaming();
        let id = tracker.job_id();
        let mut job = view(id, JobStatus::Succeeded, None);
        job.result = Some("https://cdn.example.com/out.png".into());

        assert_eq!(tracker.apply(&JobChannelMessage::Update { job }), Applied::Finished);
        assert_eq!(tracker.state(), SubscriberState::Completed);
        assert_eq!(tracker.percent(), 100);
        assert_eq!(tracker.result(), Some("https://cdn.example.com/out.png"));
    }

    #[test]
    fn failed_status_is_terminal_failure() {
        let mut tracker = streaming();
        let id = tracker.job_id();
        let mut job = view(id, JobStatus::Failed, Some(Progress::steps(2, 3)));
        job.failure_kind = Some(FailureKind::WorkerError);
        job.failure_message = Some("gpu fell over".into());

        assert_eq!(tracker.apply(&JobChannelMessage::Update { job }), Applied::Finished);
        assert_eq!(tracker.state(), SubscriberState::Failed);
        assert_eq!(
            tracker.failure(),
            (Some(FailureKind::WorkerError), Some("gpu fell over"))
        );
        assert!(tracker.snapshot().headline().contains("restored"));
    }

    #[test]
    fn delete_is_failure() {
        let mut tracker = streaming();
        let id = tracker.job_id();

        tracker.apply(&JobChannelMessage::Delete { job_id: id });

        assert_eq!(tracker.state(), SubscriberState::Failed);
    }

    #[test]
    fn server_error_is_disconnect_not_failure() {
        let mut tracker = streaming();

        tracker.apply(&JobChannelMessage::Error {
            message: "subscription closed".into(),
        });

        assert_eq!(tracker.state(), SubscriberState::Disconnected);
    }

    #[test]
    fn updates_for_other_jobs_are_ignored() {
        let mut tracker = streaming();

        let applied = tracker.apply(&update(JobId::new(), Progress::steps(3, 3)));

        assert_eq!(applied, Applied::Ignored);
        assert_eq!(tracker.percent(), 0);
    }

    #[test]
    fn nothing_changes_after_cancel() {
        let mut tracker = streaming();
        let id = tracker.job_id();
        tracker.apply(&update(id, Progress::steps(1, 3)));

        assert!(tracker.cancel());
        assert_eq!(tracker.apply(&update(id, Progress::steps(3, 3))), Applied::Ignored);
        assert!(!tracker.disconnect("late"));

        assert_eq!(tracker.state(), SubscriberState::Cancelled);
        assert_eq!(tracker.percent(), 33);
    }

    #[test]
    fn terminal_state_is_reached_once() {
        let mut tracker = streaming();
        let id = tracker.job_id();
        tracker.apply(&JobChannelMessage::Delete { job_id: id });

        assert!(!tracker.cancel());
        assert_eq!(tracker.apply(&JobChannelMessage::Delete { job_id: id }), Applied::Ignored);
        assert_eq!(tracker.state(), SubscriberState::Failed);
    }

    #[test]
    fn cancellation_requested_shows_in_headline() {
        let mut tracker = streaming();
        let id = tracker.job_id();

        tracker.apply(&JobChannelMessage::Update {
            job: view(id, JobStatus::CancellationRequested, Some(Progress::steps(1, 3))),
        });

        assert_eq!(tracker.snapshot().headline(), "Cancelling");
        assert_eq!(tracker.state(), SubscriberState::Streaming);
    }
}
