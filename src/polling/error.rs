//! Error types for polling sessions.

use std::sync::Arc;
use std::time::Duration;

/// Terminal or non-terminal failure reported by a polling session.
///
/// The provider's own failure type `E` is kept behind an [`Arc`] so that
/// session snapshots can be cloned without requiring `E: Clone`.
///
/// # Examples
///
/// ```rust
/// use tidewatch::PollError;
/// use std::time::Duration;
///
/// let err: PollError<String> = PollError::TimeoutExceeded {
///     elapsed: Duration::from_secs(301),
///     max_duration: Duration::from_secs(300),
/// };
/// assert!(err.is_terminal());
/// assert!(err.is_timeout());
/// assert!(err.to_string().contains("maximum duration"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    /// A failure with no classifiable status code. Always retried.
    #[error("transient failure: {failure}")]
    TransientNetwork {
        /// The provider's failure.
        failure: Arc<E>,
    },
    /// A failure whose status code is in the retryable set.
    #[error("retryable server error (status {code}): {failure}")]
    RetryableServer {
        /// The classified status code.
        code: u16,
        /// The provider's failure.
        failure: Arc<E>,
    },
    /// A failure whose status code is outside the retryable set.
    #[error("fatal client error (status {code}): {failure}")]
    FatalClient {
        /// The classified status code.
        code: u16,
        /// The provider's failure.
        failure: Arc<E>,
    },
    /// The session ran longer than its configured maximum duration.
    #[error("polling exceeded maximum duration of {max_duration:?} (elapsed {elapsed:?})")]
    TimeoutExceeded {
        /// Time elapsed since `start()`.
        elapsed: Duration,
        /// The configured limit.
        max_duration: Duration,
    },
    /// The attempt budget ran out before the stop condition fired.
    #[error("gave up after {attempts} attempts")]
    MaxAttemptsExhausted {
        /// Attempts performed, equal to the configured maximum.
        attempts: u32,
        /// The failure of the final attempt, if it failed.
        last_failure: Option<Arc<E>>,
    },
}

impl<E> PollError<E> {
    /// Build the error for a failure given its classified status code.
    pub(crate) fn from_failure(failure: Arc<E>, code: Option<u16>, retryable: bool) -> Self {
        match (code, retryable) {
            (None, _) => Self::TransientNetwork { failure },
            (Some(code), true) => Self::RetryableServer { code, failure },
            (Some(code), false) => Self::FatalClient { code, failure },
        }
    }

    /// Returns true if this error always ends the session.
    ///
    /// Transient and retryable failures are reported through `on_error` but
    /// the session keeps polling; every other variant stops it.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::TransientNetwork { .. } | Self::RetryableServer { .. }
        )
    }

    /// Returns true if this is a [`PollError::TimeoutExceeded`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExceeded { .. })
    }

    /// Returns true if this is a [`PollError::FatalClient`].
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalClient { .. })
    }

    /// The classified status code, if any.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::RetryableServer { code, .. } | Self::FatalClient { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The provider failure behind this error, if there is one.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::TransientNetwork { failure }
            | Self::RetryableServer { failure, .. }
            | Self::FatalClient { failure, .. } => Some(failure.as_ref()),
            Self::MaxAttemptsExhausted { last_failure, .. } => last_failure.as_deref(),
            Self::TimeoutExceeded { .. } => None,
        }
    }
}

impl<E> Clone for PollError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::TransientNetwork { failure } => Self::TransientNetwork {
                failure: Arc::clone(failure),
            },
            Self::RetryableServer { code, failure } => Self::RetryableServer {
                code: *code,
                failure: Arc::clone(failure),
            },
            Self::FatalClient { code, failure } => Self::FatalClient {
                code: *code,
                failure: Arc::clone(failure),
            },
            Self::TimeoutExceeded {
                elapsed,
                max_duration,
            } => Self::TimeoutExceeded {
                elapsed: *elapsed,
                max_duration: *max_duration,
            },
            Self::MaxAttemptsExhausted {
                attempts,
                last_failure,
            } => Self::MaxAttemptsExhausted {
                attempts: *attempts,
                last_failure: last_failure.clone(),
            },
        }
    }
}

/// Misuse of the controller lifecycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControllerError {
    /// `configure` was called while a session is polling.
    #[error("cannot configure a controller while it is polling")]
    AlreadyPolling,
    /// `start` was called on a stopped session that was not reset.
    #[error("session is stopped; call reset() before start()")]
    NotReset,
    /// `start` was called outside a tokio runtime.
    #[error("start() must be called from within a tokio runtime")]
    NoRuntime,
    /// The supplied options are inconsistent.
    #[error(transparent)]
    InvalidOptions(#[from] OptionsError),
}

/// Validation failure for [`PollingOptions`](crate::PollingOptions).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptionsError {
    /// The base interval must be non-zero.
    #[error("base interval must be greater than zero")]
    ZeroBaseInterval,
    /// The backoff cap is smaller than the base interval.
    #[error("max backoff interval {max:?} is smaller than base interval {base:?}")]
    BackoffCapBelowBase {
        /// Configured base interval.
        base: Duration,
        /// Configured backoff cap.
        max: Duration,
    },
    /// `max_attempts` was set to zero.
    #[error("max attempts must be at least 1")]
    ZeroMaxAttempts,
    /// The stuck threshold was set to zero.
    #[error("stuck detection threshold must be at least 1")]
    ZeroStuckThreshold,
    /// The near-complete ratio is outside (0, 1].
    #[error("near-complete ratio {0} must be in (0, 1]")]
    NearCompleteRatioOutOfRange(f64),
    /// The jitter spread is outside [0, 1).
    #[error("jitter spread {0} must be in [0, 1)")]
    JitterSpreadOutOfRange(f64),
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_from_failure_without_code_is_transient() {
        let err = PollError::from_failure(Arc::new("connection reset"), None, true);
        assert!(matches!(err, PollError::TransientNetwork { .. }));
        assert!(!err.is_terminal());
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_from_failure_with_retryable_code() {
        let err = PollError::from_failure(Arc::new("bad gateway"), Some(502), true);
        assert!(matches!(err, PollError::RetryableServer { code: 502, .. }));
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_from_failure_with_fatal_code() {
        let err = PollError::from_failure(Arc::new("not found"), Some(404), false);
        assert!(err.is_fatal());
        assert!(err.is_terminal());
        assert_eq!(err.code(), Some(404));
        assert_eq!(err.failure(), Some(&"not found"));
    }

    #[test]
    fn test_display_includes_code_and_failure() {
        let err = PollError::from_failure(Arc::new("upstream down"), Some(503), true);
        let display = err.to_string();
        assert!(display.contains("503"));
        assert!(display.contains("upstream down"));
    }

    #[test]
    fn test_max_attempts_exposes_last_failure() {
        let err: PollError<&str> = PollError::MaxAttemptsExhausted {
            attempts: 3,
            last_failure: Some(Arc::new("still failing")),
        };
        assert!(err.is_terminal());
        assert_eq!(err.failure(), Some(&"still failing"));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_clone_shares_failure() {
        let err = PollError::from_failure(Arc::new(String::from("boom")), Some(500), true);
        let cloned = err.clone();
        assert_eq!(cloned.code(), Some(500));
        assert_eq!(cloned.failure(), err.failure());
    }

    #[test]
    fn test_options_error_converts_into_controller_error() {
        let err: ControllerError = OptionsError::ZeroBaseInterval.into();
        assert_eq!(err, ControllerError::InvalidOptions(OptionsError::ZeroBaseInterval));
        assert!(err.to_string().contains("base interval"));
    }
}
