//! Failure classification.
//!
//! A provider failure is classified by looking for a status code, in order:
//! the failure's own status code, a nested (response) status, then a
//! `status code NNN` fragment in its message. Failures without a code are
//! treated as transient network errors and retried.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Status codes retried by default: request timeout, too many requests,
/// internal error, bad gateway, service unavailable, gateway timeout.
pub const DEFAULT_RETRYABLE_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

static STATUS_CODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)status\s+code\s*:?\s*(\d{3})\b").expect("status code pattern is valid")
});

/// A failure returned by a [`StatusProvider`](crate::StatusProvider).
///
/// Both accessors default to `None`; the message is always searched as a
/// last resort.
pub trait Failure: fmt::Display {
    /// An explicit status code carried by the failure itself.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// A status code carried by a nested value, such as an attached response.
    fn nested_status(&self) -> Option<u16> {
        None
    }
}

impl Failure for String {}

impl Failure for &'static str {}

impl Failure for std::io::Error {}

/// A ready-made failure type for HTTP-backed providers.
///
/// # Examples
///
/// ```rust
/// use tidewatch::{ErrorClassifier, HttpFailure};
///
/// let classifier = ErrorClassifier::default();
///
/// let failure = HttpFailure::new("upstream unavailable").with_status(503);
/// assert!(classifier.classify(&failure).retryable);
///
/// let failure = HttpFailure::new("job not found").with_response_status(404);
/// assert!(!classifier.classify(&failure).retryable);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    message: String,
    status: Option<u16>,
    response_status: Option<u16>,
}

impl HttpFailure {
    /// A failure with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            response_status: None,
        }
    }

    /// Attach an explicit status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the status of the response the failure came from.
    pub fn with_response_status(mut self, status: u16) -> Self {
        self.response_status = Some(status);
        self
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpFailure {}

impl Failure for HttpFailure {
    fn status_code(&self) -> Option<u16> {
        self.status
    }

    fn nested_status(&self) -> Option<u16> {
        self.response_status
    }
}

/// Result of classifying one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Whether polling should continue after this failure.
    pub retryable: bool,
    /// The status code found, if any.
    pub code: Option<u16>,
}

/// Maps failures to retryable or fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
    retryable_codes: BTreeSet<u16>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_RETRYABLE_CODES)
    }
}

impl ErrorClassifier {
    /// A classifier that retries the given status codes.
    pub fn new(retryable_codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            retryable_codes: retryable_codes.into_iter().collect(),
        }
    }

    /// The codes treated as retryable.
    pub fn retryable_codes(&self) -> &BTreeSet<u16> {
        &self.retryable_codes
    }

    /// Classify a failure. Failures with no code are retryable.
    pub fn classify<F: Failure + ?Sized>(&self, failure: &F) -> Classification {
        let code = failure
            .status_code()
            .or_else(|| failure.nested_status())
            .or_else(|| extract_status_code(&failure.to_string()));

        Classification {
            retryable: code.is_none_or(|c| self.retryable_codes.contains(&c)),
            code,
        }
    }
}

/// Find a `status code NNN` fragment in a failure message.
pub fn extract_status_code(message: &str) -> Option<u16> {
    STATUS_CODE_PATTERN
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod classify_tests {
    use super::*;

    #[test]
    fn test_default_codes_are_transient_set() {
        let classifier = ErrorClassifier::default();
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(classifier.retryable_codes().contains(&code));
        }
        assert_eq!(classifier.retryable_codes().len(), 6);
    }

    #[test]
    fn test_no_code_is_retryable() {
        let c = ErrorClassifier::default().classify(&"connection refused");
        assert_eq!(
            c,
            Classification {
                retryable: true,
                code: None
            }
        );
    }

    #[test]
    fn test_explicit_code_wins_over_nested_and_message() {
        let failure = HttpFailure::new("Request failed with status code 503")
            .with_status(400)
            .with_response_status(502);
        let c = ErrorClassifier::default().classify(&failure);
        assert_eq!(c.code, Some(400));
        assert!(!c.retryable);
    }

    #[test]
    fn test_nested_status_used_when_no_explicit_code() {
        let failure = HttpFailure::new("Request failed with status code 404").with_response_status(429);
        let c = ErrorClassifier::default().classify(&failure);
        assert_eq!(c.code, Some(429));
        assert!(c.retryable);
    }

    #[test]
    fn test_message_fragment_is_extracted() {
        let c = ErrorClassifier::default()
            .classify(&String::from("Request failed with status code 401"));
        assert_eq!(c.code, Some(401));
        assert!(!c.retryable);

        let c = ErrorClassifier::default().classify(&"upstream: Status Code: 502 Bad Gateway");
        assert_eq!(c.code, Some(502));
        assert!(c.retryable);
    }

    #[test]
    fn test_extract_ignores_unrelated_numbers() {
        assert_eq!(extract_status_code("retry 3 of 500 attempts"), None);
        assert_eq!(extract_status_code("status code 12345"), None);
        assert_eq!(extract_status_code("status code 418"), Some(418));
    }

    #[test]
    fn test_custom_retryable_set() {
        let classifier = ErrorClassifier::new([404]);
        assert!(classifier.classify(&HttpFailure::new("nf").with_status(404)).retryable);
        assert!(!classifier.classify(&HttpFailure::new("ise").with_status(500)).retryable);
    }

    #[test]
    fn test_io_error_is_transient() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let c = ErrorClassifier::default().classify(&err);
        assert!(c.retryable);
        assert_eq!(c.code, None);
    }
}
