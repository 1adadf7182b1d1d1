//! Stuck-progress detection.
//!
//! Some backends let a job's progress plateau (often just short of 100%)
//! without ever reporting a terminal status. The detector counts how many
//! consecutive snapshots reported the same [`ProgressSignal`] and escalates
//! in two tiers: a warning once the run reaches the threshold, and a forced
//! stop once it reaches `multiplier × threshold` while the signal looks
//! finished (numeric and near its maximum, or a pending status long after
//! the session began).
//!
//! The thresholds are a heuristic. They come from [`StuckDetectionOptions`]
//! rather than constants.

use crate::polling::options::StuckDetectionOptions;

/// A comparable "how far along" indicator extracted from a snapshot.
///
/// # Examples
///
/// ```rust
/// use tidewatch::ProgressSignal;
///
/// assert_eq!(ProgressSignal::percent(97.0).completion(), Some(0.97));
/// assert_eq!(ProgressSignal::steps(3, 4).completion(), Some(0.75));
/// assert!(ProgressSignal::pending("queued").is_pending());
/// assert_eq!(ProgressSignal::stage("analyzing").completion(), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressSignal {
    /// A numeric value out of a known maximum.
    Numeric {
        /// Current value.
        value: f64,
        /// The value that means "done".
        max: f64,
    },
    /// An ordinal status or stage label.
    Status {
        /// The label as reported.
        label: String,
        /// Whether the label means the job has not really started.
        pending: bool,
    },
}

impl ProgressSignal {
    /// A ratio in `[0, 1]`.
    pub fn ratio(value: f64) -> Self {
        Self::Numeric { value, max: 1.0 }
    }

    /// A percentage in `[0, 100]`.
    pub fn percent(value: f64) -> Self {
        Self::Numeric { value, max: 100.0 }
    }

    /// A `completed / total` step count.
    pub fn steps(completed: u64, total: u64) -> Self {
        Self::Numeric {
            value: completed as f64,
            max: total as f64,
        }
    }

    /// A non-pending stage label.
    pub fn stage(label: impl Into<String>) -> Self {
        Self::Status {
            label: label.into(),
            pending: false,
        }
    }

    /// A label meaning the job is still waiting to run.
    pub fn pending(label: impl Into<String>) -> Self {
        Self::Status {
            label: label.into(),
            pending: true,
        }
    }

    /// Fraction of the maximum reached, for numeric signals with a positive maximum.
    pub fn completion(&self) -> Option<f64> {
        match self {
            Self::Numeric { value, max } if *max > 0.0 => Some(value / max),
            _ => None,
        }
    }

    /// Whether this is a pending status.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Status { pending: true, .. })
    }
}

/// What the detector concluded from the latest snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckVerdict {
    /// No signal, or the signal changed or has not repeated enough.
    Advancing,
    /// The signal repeated `same_count` times; keep polling but report it.
    Stalled {
        /// Consecutive snapshots with this signal.
        same_count: u32,
    },
    /// The job should be treated as complete even though it never said so.
    ForceStop {
        /// Consecutive snapshots with this signal.
        same_count: u32,
    },
}

/// Tracks `(last_signal, same_signal_count)` for one session.
#[derive(Debug, Clone)]
pub struct ProgressStuckDetector {
    options: StuckDetectionOptions,
    last_signal: Option<ProgressSignal>,
    same_count: u32,
}

impl ProgressStuckDetector {
    /// A detector with no history.
    pub fn new(options: StuckDetectionOptions) -> Self {
        Self {
            options,
            last_signal: None,
            same_count: 0,
        }
    }

    /// The last signal observed.
    pub fn last_signal(&self) -> Option<&ProgressSignal> {
        self.last_signal.as_ref()
    }

    /// Consecutive snapshots that reported the last signal.
    pub fn same_signal_count(&self) -> u32 {
        self.same_count
    }

    /// Record one successful snapshot.
    ///
    /// `attempts` is the session's total attempt count including this one.
    /// Snapshots without a signal leave the history untouched.
    pub fn observe(&mut self, signal: Option<ProgressSignal>, attempts: u32) -> StuckVerdict {
        let Some(signal) = signal else {
            return StuckVerdict::Advancing;
        };

        if self.last_signal.as_ref() == Some(&signal) {
            self.same_count = self.same_count.saturating_add(1);
        } else {
            self.last_signal = Some(signal);
            self.same_count = 1;
        }

        if !self.options.enabled {
            return StuckVerdict::Advancing;
        }

        let same_count = self.same_count;
        if same_count >= self.options.force_stop_count() && self.looks_finished(attempts) {
            StuckVerdict::ForceStop { same_count }
        } else if same_count >= self.options.threshold {
            StuckVerdict::Stalled { same_count }
        } else {
            StuckVerdict::Advancing
        }
    }

    fn looks_finished(&self, attempts: u32) -> bool {
        match &self.last_signal {
            Some(signal @ ProgressSignal::Numeric { .. }) => signal
                .completion()
                .is_some_and(|c| c >= self.options.near_complete_ratio),
            Some(ProgressSignal::Status { pending, .. }) => {
                *pending && attempts > self.options.pending_attempt_floor
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod stuck_tests {
    use super::*;

    fn detector() -> ProgressStuckDetector {
        ProgressStuckDetector::new(StuckDetectionOptions::default())
    }

    #[test]
    fn test_first_signal_starts_run_at_one() {
        let mut d = detector();
        assert_eq!(d.observe(Some(ProgressSignal::ratio(0.1)), 1), StuckVerdict::Advancing);
        assert_eq!(d.same_signal_count(), 1);
        assert_eq!(d.last_signal(), Some(&ProgressSignal::ratio(0.1)));
    }

    #[test]
    fn test_changed_signal_restarts_run() {
        let mut d = detector();
        d.observe(Some(ProgressSignal::ratio(0.1)), 1);
        d.observe(Some(ProgressSignal::ratio(0.1)), 2);
        assert_eq!(d.same_signal_count(), 2);
        d.observe(Some(ProgressSignal::ratio(0.2)), 3);
        assert_eq!(d.same_signal_count(), 1);
    }

    #[test]
    fn test_missing_signal_keeps_history() {
        let mut d = detector();
        d.observe(Some(ProgressSignal::stage("analyzing")), 1);
        assert_eq!(d.observe(None, 2), StuckVerdict::Advancing);
        assert_eq!(d.same_signal_count(), 1);
        d.observe(Some(ProgressSignal::stage("analyzing")), 3);
        assert_eq!(d.same_signal_count(), 2);
    }

    #[test]
    fn test_warn_tier_at_threshold() {
        let mut d = detector();
        for n in 1..5 {
            assert_eq!(
                d.observe(Some(ProgressSignal::ratio(0.4)), n),
                StuckVerdict::Advancing
            );
        }
        assert_eq!(
            d.observe(Some(ProgressSignal::ratio(0.4)), 5),
            StuckVerdict::Stalled { same_count: 5 }
        );
    }

    #[test]
    fn test_plateau_far_from_done_never_force_stops() {
        let mut d = detector();
        let mut last = StuckVerdict::Advancing;
        for n in 1..=50 {
            last = d.observe(Some(ProgressSignal::percent(40.0)), n);
        }
        assert_eq!(last, StuckVerdict::Stalled { same_count: 50 });
    }

    #[test]
    fn test_plateau_near_done_force_stops_at_double_threshold() {
        let mut d = detector();
        for n in 1..10 {
            assert!(!matches!(
                d.observe(Some(ProgressSignal::ratio(0.97)), n),
                StuckVerdict::ForceStop { .. }
            ));
        }
        assert_eq!(
            d.observe(Some(ProgressSignal::ratio(0.97)), 10),
            StuckVerdict::ForceStop { same_count: 10 }
        );
    }

    #[test]
    fn test_steps_near_total_count_as_near_done() {
        let mut d = detector();
        let mut last = StuckVerdict::Advancing;
        for n in 1..=10 {
            last = d.observe(Some(ProgressSignal::steps(19, 20)), n);
        }
        assert_eq!(last, StuckVerdict::ForceStop { same_count: 10 });
    }

    #[test]
    fn test_pending_force_stops_only_after_attempt_floor() {
        let mut d = detector();
        let mut last = StuckVerdict::Advancing;
        for n in 1..=10 {
            last = d.observe(Some(ProgressSignal::pending("queued")), n);
        }
        // ten identical pending snapshots but only ten attempts
        assert_eq!(last, StuckVerdict::Stalled { same_count: 10 });
        assert_eq!(
            d.observe(Some(ProgressSignal::pending("queued")), 11),
            StuckVerdict::ForceStop { same_count: 11 }
        );
    }

    #[test]
    fn test_non_pending_stage_never_force_stops() {
        let mut d = detector();
        let mut last = StuckVerdict::Advancing;
        for n in 1..=40 {
            last = d.observe(Some(ProgressSignal::stage("analyzing")), n);
        }
        assert_eq!(last, StuckVerdict::Stalled { same_count: 40 });
    }

    #[test]
    fn test_disabled_detector_still_counts() {
        let mut d = ProgressStuckDetector::new(StuckDetectionOptions::disabled());
        for n in 1..=30 {
            assert_eq!(
                d.observe(Some(ProgressSignal::ratio(1.0)), n),
                StuckVerdict::Advancing
            );
        }
        assert_eq!(d.same_signal_count(), 30);
    }

    #[test]
    fn test_zero_max_has_no_completion() {
        assert_eq!(ProgressSignal::steps(0, 0).completion(), None);
    }
}
