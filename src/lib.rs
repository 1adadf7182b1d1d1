//! # Tidewatch
//!
//! > *"Watch the tide until it turns"*
//!
//! Adaptive polling for remote jobs that cannot push their status.
//!
//! ## Philosophy
//!
//! **Tidewatch** keeps the decisions pure and the waiting in one place:
//! - **Policies** = pure functions (backoff, failure classification,
//!   stuck-progress detection)
//! - **Controller** = the only thing that sleeps, fetches, and mutates state
//!
//! ## Quick Example
//!
//! ```rust
//! use tidewatch::{from_fn, PollOutcome, PollingController, PollingOptions};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let provider = from_fn(|| async { Ok::<_, String>("completed") });
//!
//! let mut controller = PollingController::new(provider)
//!     .stop_when(|status: &&str| *status == "completed");
//! controller
//!     .configure(PollingOptions::default().with_base_interval(Duration::from_millis(10)))
//!     .unwrap();
//! controller.start().unwrap();
//!
//! match controller.wait().await {
//!     PollOutcome::Completed(status) => println!("job finished: {}", status),
//!     PollOutcome::LikelyComplete { data, .. } => println!("job probably finished: {}", data),
//!     PollOutcome::Failed(err) => println!("gave up: {}", err),
//!     PollOutcome::Cancelled => println!("stopped"),
//! }
//! # });
//! ```
//!
//! See [`polling`] for the full tour and `demos/` for a runnable program.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod polling;
pub mod testing;

// Re-exports
pub use polling::{
    from_fn, poll_until, BackoffPolicy, Classification, ControllerError, ErrorClassifier, Failure,
    FixedJitter, FnProvider, HttpFailure, JitterSource, OptionsError, Phase, PollError,
    PollOutcome, PollingController, PollingOptions, PollingSession, ProgressSignal,
    ProgressStuckDetector, RandomJitter, StallReport, StatusProvider, StopHandle,
    StuckDetectionOptions, StuckVerdict,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::polling::{
        from_fn, poll_until, ControllerError, Failure, HttpFailure, Phase, PollError,
        PollOutcome, PollingController, PollingOptions, ProgressSignal, StatusProvider,
    };
}
