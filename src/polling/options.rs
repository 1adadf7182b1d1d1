//! Tuning options for a polling session.

use std::collections::BTreeSet;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::polling::backoff::{BackoffPolicy, DEFAULT_JITTER_SPREAD};
use crate::polling::classify::{ErrorClassifier, DEFAULT_RETRYABLE_CODES};
use crate::polling::error::OptionsError;

/// Default wait between successful polls.
pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_millis(2000);

/// Default cap on the backoff interval.
pub const DEFAULT_MAX_BACKOFF_INTERVAL: Duration = Duration::from_millis(30_000);

/// Default limit on total polling time.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(5 * 60);

/// Thresholds for the stuck-progress heuristic.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct StuckDetectionOptions {
    /// Turn the escalation tiers on or off. Signals are tracked either way.
    pub enabled: bool,
    /// Identical snapshots in a row before progress is reported as stalled.
    pub threshold: u32,
    /// The forced stop needs `threshold * force_stop_multiplier` identical snapshots.
    pub force_stop_multiplier: u32,
    /// Completion fraction at which a numeric plateau counts as finished.
    pub near_complete_ratio: f64,
    /// A pending status only counts as finished after more attempts than this.
    pub pending_attempt_floor: u32,
}

impl Default for StuckDetectionOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            force_stop_multiplier: 2,
            near_complete_ratio: 0.95,
            pending_attempt_floor: 10,
        }
    }
}

impl StuckDetectionOptions {
    /// Track signals but never warn or force a stop.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Identical snapshots in a row needed for the forced stop.
    pub fn force_stop_count(&self) -> u32 {
        self.threshold.saturating_mul(self.force_stop_multiplier.max(1))
    }
}

/// Everything about a session that is plain data.
///
/// Callbacks and the stop condition are registered on the
/// [`PollingController`](crate::PollingController) instead.
///
/// # Examples
///
/// ```rust
/// use tidewatch::PollingOptions;
/// use std::time::Duration;
///
/// let options = PollingOptions::default()
///     .with_base_interval(Duration::from_secs(1))
///     .with_max_attempts(20)
///     .with_stuck_threshold(3);
///
/// assert!(options.validate().is_ok());
/// assert_eq!(options.max_attempts, Some(20));
/// assert_eq!(options.max_duration, Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct PollingOptions {
    /// Wait between polls when nothing is failing.
    pub base_interval: Duration,
    /// Stop after this many completed fetches. `None` means unbounded.
    pub max_attempts: Option<u32>,
    /// Stop once this much time has passed since `start()`.
    pub max_duration: Duration,
    /// Grow the interval after consecutive failures.
    pub use_exponential_backoff: bool,
    /// Upper bound for the backoff interval.
    pub max_backoff_interval: Duration,
    /// Proportional jitter applied to backoff intervals.
    pub jitter_spread: f64,
    /// Status codes treated as transient.
    pub retryable_failure_codes: BTreeSet<u16>,
    /// Stuck-progress heuristic thresholds.
    pub stuck_detection: StuckDetectionOptions,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            base_interval: DEFAULT_BASE_INTERVAL,
            max_attempts: None,
            max_duration: DEFAULT_MAX_DURATION,
            use_exponential_backoff: true,
            max_backoff_interval: DEFAULT_MAX_BACKOFF_INTERVAL,
            jitter_spread: DEFAULT_JITTER_SPREAD,
            retryable_failure_codes: DEFAULT_RETRYABLE_CODES.into_iter().collect(),
            stuck_detection: StuckDetectionOptions::default(),
        }
    }
}

impl PollingOptions {
    /// Set the base interval.
    pub fn with_base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    /// Limit the number of fetches.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Limit the total polling time.
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = duration;
        self
    }

    /// Enable or disable exponential backoff.
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    /// Set the backoff cap.
    pub fn with_max_backoff_interval(mut self, interval: Duration) -> Self {
        self.max_backoff_interval = interval;
        self
    }

    /// Set the jitter spread; `0.15` draws factors from `[0.85, 1.15]`.
    pub fn with_jitter_spread(mut self, spread: f64) -> Self {
        self.jitter_spread = spread;
        self
    }

    /// Replace the retryable status codes.
    pub fn with_retryable_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_failure_codes = codes.into_iter().collect();
        self
    }

    /// Set the stuck-detection threshold.
    pub fn with_stuck_threshold(mut self, threshold: u32) -> Self {
        self.stuck_detection.threshold = threshold;
        self
    }

    /// Replace all stuck-detection options.
    pub fn with_stuck_detection(mut self, stuck: StuckDetectionOptions) -> Self {
        self.stuck_detection = stuck;
        self
    }

    /// Check that the options are consistent.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.base_interval.is_zero() {
            return Err(OptionsError::ZeroBaseInterval);
        }
        if self.use_exponential_backoff && self.max_backoff_interval < self.base_interval {
            return Err(OptionsError::BackoffCapBelowBase {
                base: self.base_interval,
                max: self.max_backoff_interval,
            });
        }
        if self.max_attempts == Some(0) {
            return Err(OptionsError::ZeroMaxAttempts);
        }
        if !(0.0..1.0).contains(&self.jitter_spread) {
            return Err(OptionsError::JitterSpreadOutOfRange(self.jitter_spread));
        }
        let stuck = &self.stuck_detection;
        if stuck.enabled && stuck.threshold == 0 {
            return Err(OptionsError::ZeroStuckThreshold);
        }
        if !(stuck.near_complete_ratio > 0.0 && stuck.near_complete_ratio <= 1.0) {
            return Err(OptionsError::NearCompleteRatioOutOfRange(
                stuck.near_complete_ratio,
            ));
        }
        Ok(())
    }

    /// The backoff policy these options describe.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        if self.use_exponential_backoff {
            BackoffPolicy::new(self.base_interval, self.max_backoff_interval)
                .with_jitter_spread(self.jitter_spread)
        } else {
            BackoffPolicy::constant(self.base_interval)
        }
    }

    /// The classifier these options describe.
    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new(self.retryable_failure_codes.iter().copied())
    }
}

#[cfg(test)]
mod options_tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let o = PollingOptions::default();
        assert_eq!(o.base_interval, Duration::from_millis(2000));
        assert_eq!(o.max_attempts, None);
        assert_eq!(o.max_duration, Duration::from_secs(300));
        assert!(o.use_exponential_backoff);
        assert_eq!(o.max_backoff_interval, Duration::from_millis(30_000));
        assert_eq!(
            o.retryable_failure_codes.iter().copied().collect::<Vec<_>>(),
            vec![408, 429, 500, 502, 503, 504]
        );
        assert_eq!(o.stuck_detection.threshold, 5);
        assert_eq!(o.stuck_detection.force_stop_count(), 10);
        assert!(o.validate().is_ok());
    }

    #[test]
    fn test_zero_base_interval_rejected() {
        let o = PollingOptions::default().with_base_interval(Duration::ZERO);
        assert_eq!(o.validate(), Err(OptionsError::ZeroBaseInterval));
    }

    #[test]
    fn test_cap_below_base_rejected_only_with_backoff() {
        let o = PollingOptions::default()
            .with_base_interval(Duration::from_secs(10))
            .with_max_backoff_interval(Duration::from_secs(5));
        assert!(matches!(
            o.validate(),
            Err(OptionsError::BackoffCapBelowBase { .. })
        ));
        assert!(o.with_exponential_backoff(false).validate().is_ok());
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let o = PollingOptions::default().with_max_attempts(0);
        assert_eq!(o.validate(), Err(OptionsError::ZeroMaxAttempts));
    }

    #[test]
    fn test_jitter_spread_range() {
        assert!(PollingOptions::default().with_jitter_spread(0.0).validate().is_ok());
        assert_eq!(
            PollingOptions::default().with_jitter_spread(1.0).validate(),
            Err(OptionsError::JitterSpreadOutOfRange(1.0))
        );
    }

    #[test]
    fn test_stuck_threshold_zero_allowed_when_disabled() {
        let o = PollingOptions::default().with_stuck_threshold(0);
        assert_eq!(o.validate(), Err(OptionsError::ZeroStuckThreshold));

        let mut stuck = StuckDetectionOptions::disabled();
        stuck.threshold = 0;
        assert!(PollingOptions::default()
            .with_stuck_detection(stuck)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_near_complete_ratio_range() {
        let mut stuck = StuckDetectionOptions::default();
        stuck.near_complete_ratio = 1.5;
        assert!(matches!(
            PollingOptions::default().with_stuck_detection(stuck).validate(),
            Err(OptionsError::NearCompleteRatioOutOfRange(_))
        ));
    }

    #[test]
    fn test_backoff_policy_follows_flag() {
        let o = PollingOptions::default();
        assert!(o.backoff_policy().is_exponential());
        assert!(!o.with_exponential_backoff(false).backoff_policy().is_exponential());
    }

    #[test]
    fn test_classifier_uses_configured_codes() {
        let o = PollingOptions::default().with_retryable_codes([409]);
        assert_eq!(
            o.classifier().retryable_codes().iter().copied().collect::<Vec<_>>(),
            vec![409]
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_fills_missing_fields_with_defaults() {
        let o: PollingOptions =
            serde_json::from_str(r#"{ "max_attempts": 7, "stuck_detection": { "threshold": 3 } }"#)
                .unwrap();
        assert_eq!(o.max_attempts, Some(7));
        assert_eq!(o.base_interval, DEFAULT_BASE_INTERVAL);
        assert_eq!(o.stuck_detection.threshold, 3);
        assert_eq!(o.stuck_detection.near_complete_ratio, 0.95);
    }
}
