//! Backoff policy for polling after consecutive failures.
//!
//! The interval after `n` consecutive failures is
//! `base * min(10, 2^(n - 1)) * jitter`, clamped to `[base, max_backoff]`.
//! Jitter is drawn from a [`JitterSource`] so tests can make it deterministic.

use std::fmt;
use std::time::Duration;

/// Largest multiplier applied to the base interval.
pub const MAX_BACKOFF_FACTOR: u64 = 10;

/// Default proportional jitter spread: factors fall in `[0.85, 1.15]`.
pub const DEFAULT_JITTER_SPREAD: f64 = 0.15;

/// Source of jitter factors.
///
/// `factor(low, high)` must return a value in `[low, high]`.
pub trait JitterSource: Send + Sync + fmt::Debug {
    /// Draw one jitter factor from `[low, high]`.
    fn factor(&self, low: f64, high: f64) -> f64;
}

/// Uniform random jitter backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn factor(&self, low: f64, high: f64) -> f64 {
        use rand::Rng;
        if high <= low {
            return low;
        }
        rand::rng().random_range(low..=high)
    }
}

/// Jitter that always returns the same factor, clamped into range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedJitter(pub f64);

impl FixedJitter {
    /// No jitter at all: every factor is `1.0`.
    pub const NONE: FixedJitter = FixedJitter(1.0);
}

impl JitterSource for FixedJitter {
    fn factor(&self, low: f64, high: f64) -> f64 {
        self.0.clamp(low, high.max(low))
    }
}

/// Computes the wait before the next poll after failures.
///
/// Policies are plain data; they never sleep.
///
/// # Examples
///
/// ```rust
/// use tidewatch::{BackoffPolicy, FixedJitter};
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::new(Duration::from_millis(1000), Duration::from_secs(30));
///
/// assert_eq!(policy.next_interval(1, &FixedJitter::NONE), Duration::from_millis(1000));
/// assert_eq!(policy.next_interval(2, &FixedJitter::NONE), Duration::from_millis(2000));
/// assert_eq!(policy.next_interval(3, &FixedJitter::NONE), Duration::from_millis(4000));
/// // factor caps at 10x
/// assert_eq!(policy.next_interval(9, &FixedJitter::NONE), Duration::from_millis(10_000));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    exponential: bool,
    jitter_spread: f64,
}

impl BackoffPolicy {
    /// Exponential backoff from `base`, capped at `max`, with the default
    /// jitter spread.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            exponential: true,
            jitter_spread: DEFAULT_JITTER_SPREAD,
        }
    }

    /// A policy that always waits `base`.
    pub fn constant(base: Duration) -> Self {
        Self {
            base,
            max: base,
            exponential: false,
            jitter_spread: 0.0,
        }
    }

    /// Set the proportional jitter spread, clamped to `[0, 1)`.
    pub fn with_jitter_spread(mut self, spread: f64) -> Self {
        self.jitter_spread = spread.clamp(0.0, 0.99);
        self
    }

    /// Enable or disable exponential growth.
    pub fn with_exponential(mut self, exponential: bool) -> Self {
        self.exponential = exponential;
        self
    }

    /// The base interval.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// The backoff cap.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Whether intervals grow with consecutive failures.
    pub fn is_exponential(&self) -> bool {
        self.exponential
    }

    /// Multiplier before jitter for `consecutive_errors` failures in a row.
    ///
    /// Zero failures means no backoff at all.
    pub fn factor(consecutive_errors: u32) -> u64 {
        if consecutive_errors == 0 {
            return 1;
        }
        let exp = consecutive_errors - 1;
        if exp >= 4 {
            MAX_BACKOFF_FACTOR
        } else {
            (1u64 << exp).min(MAX_BACKOFF_FACTOR)
        }
    }

    /// The interval to wait after `consecutive_errors` failures in a row.
    ///
    /// With exponential backoff disabled, or with no failures, this is always
    /// the base interval. Otherwise the result lies in `[base, max]`.
    pub fn next_interval(&self, consecutive_errors: u32, jitter: &dyn JitterSource) -> Duration {
        if !self.exponential || consecutive_errors == 0 {
            return self.base;
        }

        let factor = Self::factor(consecutive_errors) as f64;
        let spread = self.jitter_spread;
        let jitter = jitter.factor(1.0 - spread, 1.0 + spread);
        let millis = (self.base.as_millis() as f64 * factor * jitter).floor();

        let interval = if millis.is_finite() && millis >= 0.0 {
            Duration::from_millis(millis as u64)
        } else {
            self.max
        };

        interval.min(self.max).max(self.base)
    }
}
