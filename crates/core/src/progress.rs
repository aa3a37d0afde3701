//! Structured job progress and its mapping to a display percentage.
//!
//! Workers report progress as a [`Progress`] value. The store keeps both
//! the structured form and its legacy string rendering (`"2/3 steps"`,
//! `"compositing"`, ...) so that older subscribers which only understand
//! the free-form message keep working; [`Progress::parse`] recovers the
//! structured form from such a string.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Percentage checkpoints
// ---------------------------------------------------------------------------

/// Checkpoint shown while the worker is preparing the job.
pub const INITIALIZING_PERCENT: u8 = 5;
/// Lower edge of the band reserved for countable steps.
pub const STEP_BAND_START: u8 = 10;
/// Upper edge of the band reserved for countable steps.
pub const STEP_BAND_END: u8 = 80;
/// Checkpoint for background synthesis.
pub const BACKGROUND_PERCENT: u8 = 85;
/// Checkpoint for the final composition step.
pub const COMPOSITING_PERCENT: u8 = 92;
/// Checkpoint for progress text that matches no known phase.
pub const RAW_PERCENT: u8 = STEP_BAND_START;
/// A job whose result is present.
pub const COMPLETE_PERCENT: u8 = 100;

/// `<int>/<int>` anywhere in a legacy progress message.
static STEP_COUNTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*/\s*(\d+)").expect("valid regex"));

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Non-countable pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Background,
    Compositing,
}

impl Phase {
    /// The legacy progress string for this phase.
    pub fn as_message(self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Background => "creating background",
            Phase::Compositing => "compositing",
        }
    }

    pub fn percent(self) -> u8 {
        match self {
            Phase::Initializing => INITIALIZING_PERCENT,
            Phase::Background => BACKGROUND_PERCENT,
            Phase::Compositing => COMPOSITING_PERCENT,
        }
    }

    /// Keyword matched (case-insensitively) inside legacy messages.
    ///
    /// Ordered so that more specific phases win when a message mentions
    /// several keywords.
    const KEYWORDS: [(&'static str, Phase); 3] = [
        ("compositing", Phase::Compositing),
        ("background", Phase::Background),
        ("initializing", Phase::Initializing),
    ];
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// A single progress report written by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
    /// `done` of `total` countable sub-steps have finished.
    Countable { done: u32, total: u32 },
    /// A named, non-countable phase has started.
    Named { phase: Phase },
    /// Free-form text; displayed verbatim at [`RAW_PERCENT`].
    Raw { message: String },
}

impl Progress {
    pub fn steps(done: u32, total: u32) -> Self {
        Progress::Countable {
            done: done.min(total),
            total,
        }
    }

    pub fn phase(phase: Phase) -> Self {
        Progress::Named { phase }
    }

    /// Recover structured progress from a legacy free-form message.
    ///
    /// A `k/n` counter takes precedence over phase keywords. Counters with
    /// `k > n` are clamped to `n/n`. Text that matches nothing becomes
    /// [`Progress::Raw`].
    pub fn parse(message: &str) -> Self {
        if let Some(caps) = STEP_COUNTER_RE.captures(message) {
            let done = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
            let total = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
            if let (Some(done), Some(total)) = (done, total) {
                return Progress::steps(done, total);
            }
        }

        let lowered = message.to_ascii_lowercase();
        for (keyword, phase) in Phase::KEYWORDS {
            if lowered.contains(keyword) {
                return Progress::phase(phase);
            }
        }

        Progress::Raw {
            message: message.to_string(),
        }
    }

    /// Percentage to display for this report, in `0..=99`.
    ///
    /// Countable steps map linearly into
    /// [`STEP_BAND_START`]..=[`STEP_BAND_END`]; named phases map to fixed
    /// checkpoints. Only a populated result reaches [`COMPLETE_PERCENT`].
    pub fn percent(&self) -> u8 {
        match self {
            Progress::Countable { done, total } => {
                if *total == 0 {
                    return STEP_BAND_START;
                }
                let done = u64::from((*done).min(*total));
                let span = u64::from(STEP_BAND_END - STEP_BAND_START);
                let offset = span * done / u64::from(*total);
                // offset <= span, so this always fits in a u8.
                STEP_BAND_START + offset as u8
            }
            Progress::Named { phase } => phase.percent(),
            Progress::Raw { .. } => RAW_PERCENT,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Progress::Raw { .. })
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Countable { done, total } => write!(f, "{done}/{total} steps"),
            Progress::Named { phase } => f.write_str(phase.as_message()),
            Progress::Raw { message } => f.write_str(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Parsing --

    #[test]
    fn parse_step_counter() {
        assert_eq!(Progress::parse("2/3 steps"), Progress::steps(2, 3));
    }

    #[test]
    fn parse_step_counter_embedded_in_text() {
        assert_eq!(
            Progress::parse("Generating character 1 / 4 ..."),
            Progress::steps(1, 4)
        );
    }

    #[test]
    fn parse_counter_beats_keywords() {
        assert_eq!(
            Progress::parse("compositing 3/3 steps"),
            Progress::steps(3, 3)
        );
    }

    #[test]
    fn parse_clamps_overshooting_counter() {
        assert_eq!(Progress::parse("5/3 steps"), Progress::steps(3, 3));
    }

    #[test]
    fn parse_named_phases_case_insensitive() {
        assert_eq!(
            Progress::parse("Compositing"),
            Progress::phase(Phase::Compositing)
        );
        assert_eq!(
            Progress::parse("creating background"),
            Progress::phase(Phase::Background)
        );
        assert_eq!(
            Progress::parse("Initializing generation"),
            Progress::phase(Phase::Initializing)
        );
    }

    #[test]
    fn parse_unknown_text_is_raw() {
        let p = Progress::parse("warming up the GPUs");
        assert_eq!(
            p,
            Progress::Raw {
                message: "warming up the GPUs".into()
            }
        );
        assert!(p.is_raw());
    }

    #[test]
    fn parse_counter_too_large_for_u32_falls_back_to_raw() {
        assert!(Progress::parse("99999999999/3").is_raw());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for p in [
            Progress::steps(1, 3),
            Progress::phase(Phase::Initializing),
            Progress::phase(Phase::Background),
            Progress::phase(Phase::Compositing),
        ] {
            assert_eq!(Progress::parse(&p.to_string()), p);
        }
    }

    // -- Percentages --

    #[test]
    fn countable_steps_fill_the_band_linearly() {
        assert_eq!(Progress::steps(0, 3).percent(), STEP_BAND_START);
        assert_eq!(Progress::steps(1, 3).percent(), 33);
        assert_eq!(Progress::steps(2, 3).percent(), 56);
        assert_eq!(Progress::steps(3, 3).percent(), STEP_BAND_END);
    }

    #[test]
    fn zero_total_sits_at_band_start() {
        assert_eq!(Progress::steps(0, 0).percent(), STEP_BAND_START);
    }

    #[test]
    fn named_phases_use_fixed_checkpoints() {
        assert_eq!(Progress::phase(Phase::Initializing).percent(), 5);
        assert_eq!(Progress::phase(Phase::Background).percent(), 85);
        assert_eq!(Progress::phase(Phase::Compositing).percent(), 92);
    }

    #[test]
    fn no_progress_report_reaches_completion() {
        assert!(Progress::steps(u32::MAX, u32::MAX).percent() < COMPLETE_PERCENT);
        assert!(Progress::phase(Phase::Compositing).percent() < COMPLETE_PERCENT);
    }

    // -- Serde --

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(Progress::steps(2, 5)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "countable", "done": 2, "total": 5}));

        let json = serde_json::to_value(Progress::phase(Phase::Background)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "named", "phase": "background"}));
    }
}
