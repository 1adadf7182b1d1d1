//! Adaptive polling for remote jobs.
//!
//! The module follows a "pure core, imperative shell" split:
//!
//! - **Pure core**: [`BackoffPolicy`], [`ErrorClassifier`] and
//!   [`ProgressStuckDetector`] are plain data and functions, easy to test on
//!   their own.
//! - **Shell**: [`PollingController`] owns the session, sleeps, fetches, and
//!   calls back into your code.
//!
//! # Quick Start
//!
//! ```rust
//! use tidewatch::{from_fn, PollingController, PollingOptions, ProgressSignal};
//! use std::time::Duration;
//!
//! #[derive(Clone)]
//! struct JobStatus {
//!     status: &'static str,
//!     progress_percentage: f64,
//! }
//!
//! # tokio_test::block_on(async {
//! let provider = from_fn(|| async {
//!     Ok::<_, String>(JobStatus { status: "completed", progress_percentage: 100.0 })
//! });
//!
//! let mut controller = PollingController::new(provider)
//!     .stop_when(|s: &JobStatus| matches!(s.status, "completed" | "failed"))
//!     .progress_signal(|s: &JobStatus| Some(ProgressSignal::percent(s.progress_percentage)))
//!     .on_error(|err| eprintln!("poll failed: {err}"));
//!
//! controller
//!     .configure(PollingOptions::default().with_base_interval(Duration::from_millis(10)))
//!     .unwrap();
//! controller.start().unwrap();
//!
//! assert!(controller.wait().await.is_confirmed());
//! # });
//! ```
//!
//! # Termination
//!
//! A session ends when one of these happens:
//!
//! - the stop condition accepts a snapshot ([`PollOutcome::Completed`])
//! - progress plateaus near completion ([`PollOutcome::LikelyComplete`])
//! - a failure is classified as fatal, the attempt budget runs out, or the
//!   maximum duration passes ([`PollOutcome::Failed`])
//! - the owner calls `stop()`, `reset()`, or drops the controller
//!   ([`PollOutcome::Cancelled`])
//!
//! # Error Types
//!
//! - [`PollError`]: failures reported to observers, terminal or not
//! - [`ControllerError`]: misuse of the lifecycle API
//! - [`OptionsError`]: inconsistent [`PollingOptions`]

mod backoff;
mod classify;
mod controller;
mod error;
mod options;
mod provider;
mod session;
mod stuck;

pub use backoff::{
    BackoffPolicy, FixedJitter, JitterSource, RandomJitter, DEFAULT_JITTER_SPREAD,
    MAX_BACKOFF_FACTOR,
};
pub use classify::{
    extract_status_code, Classification, ErrorClassifier, Failure, HttpFailure,
    DEFAULT_RETRYABLE_CODES,
};
pub use controller::{poll_until, PollingController, StopHandle};
pub use error::{ControllerError, OptionsError, PollError};
pub use options::{
    PollingOptions, StuckDetectionOptions, DEFAULT_BASE_INTERVAL, DEFAULT_MAX_BACKOFF_INTERVAL,
    DEFAULT_MAX_DURATION,
};
pub use provider::{from_fn, FnProvider, StatusProvider};
pub use session::{Phase, PollOutcome, PollingSession, StallReport};
pub use stuck::{ProgressSignal, ProgressStuckDetector, StuckVerdict};
