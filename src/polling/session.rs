//! Session state shared with observers.

use std::time::Duration;

use tokio::time::Instant;

use crate::polling::error::PollError;
use crate::polling::stuck::ProgressSignal;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Not started, or reset.
    #[default]
    Idle,
    /// Fetching and waiting between fetches.
    Polling,
    /// Finished or stopped. Needs `reset()` before it can start again.
    Stopped,
}

/// How a session ended.
#[derive(Debug)]
pub enum PollOutcome<T, E> {
    /// The stop condition accepted this snapshot.
    Completed(T),
    /// Progress stopped moving near the end and the session was ended
    /// without the stop condition ever firing. The data is the last snapshot
    /// seen, and the job is only assumed to be complete.
    LikelyComplete {
        /// The last snapshot.
        data: T,
        /// How many consecutive snapshots reported the same progress.
        same_signal_count: u32,
    },
    /// A terminal error ended the session.
    Failed(PollError<E>),
    /// The owner stopped the session.
    Cancelled,
}

impl<T, E> PollOutcome<T, E> {
    /// True for [`Completed`](Self::Completed) and [`LikelyComplete`](Self::LikelyComplete).
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::LikelyComplete { .. })
    }

    /// True only when the stop condition confirmed completion.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The final snapshot, for successful outcomes.
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Completed(data) | Self::LikelyComplete { data, .. } => Some(data),
            _ => None,
        }
    }

    /// The terminal error, for failed outcomes.
    pub fn error(&self) -> Option<&PollError<E>> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl<T: Clone, E> Clone for PollOutcome<T, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Completed(data) => Self::Completed(data.clone()),
            Self::LikelyComplete {
                data,
                same_signal_count,
            } => Self::LikelyComplete {
                data: data.clone(),
                same_signal_count: *same_signal_count,
            },
            Self::Failed(err) => Self::Failed(err.clone()),
            Self::Cancelled => Self::Cancelled,
        }
    }
}

/// Warn-tier report: progress has not moved for a while.
#[derive(Debug, Clone, PartialEq)]
pub struct StallReport {
    /// The repeated signal.
    pub signal: ProgressSignal,
    /// Consecutive snapshots that reported it.
    pub same_count: u32,
    /// Total attempts so far.
    pub attempts: u32,
}

/// The state of one watch operation.
///
/// The controller owns and mutates it; everyone else sees clones.
#[derive(Debug)]
pub struct PollingSession<T, E> {
    pub(crate) id: u64,
    /// Lifecycle phase.
    pub phase: Phase,
    /// Completed fetches, successful or not.
    pub attempts: u32,
    /// Wait before the next fetch.
    pub current_interval: Duration,
    /// Failures since the last success.
    pub consecutive_errors: u32,
    /// Last progress signal observed.
    pub last_signal: Option<ProgressSignal>,
    /// Consecutive snapshots that reported `last_signal`.
    pub same_signal_count: u32,
    /// When `start()` was called.
    pub started_at: Option<Instant>,
    /// The most recent successful snapshot.
    pub last_data: Option<T>,
    /// The most recent failure since the last success.
    pub last_error: Option<PollError<E>>,
    /// Set once the session has ended.
    pub outcome: Option<PollOutcome<T, E>>,
}

impl<T, E> PollingSession<T, E> {
    /// A fresh idle session.
    pub(crate) fn idle(base_interval: Duration) -> Self {
        Self {
            id: 0,
            phase: Phase::Idle,
            attempts: 0,
            current_interval: base_interval,
            consecutive_errors: 0,
            last_signal: None,
            same_signal_count: 0,
            started_at: None,
            last_data: None,
            last_error: None,
            outcome: None,
        }
    }

    /// A session that has just started polling.
    pub(crate) fn started(id: u64, base_interval: Duration, now: Instant) -> Self {
        Self {
            id,
            phase: Phase::Polling,
            started_at: Some(now),
            ..Self::idle(base_interval)
        }
    }

    /// Time since `start()`, or zero if never started.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the session has ended.
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// End the session.
    pub(crate) fn finish(&mut self, outcome: PollOutcome<T, E>) {
        self.phase = Phase::Stopped;
        self.outcome = Some(outcome);
    }
}

impl<T: Clone, E> Clone for PollingSession<T, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            phase: self.phase,
            attempts: self.attempts,
            current_interval: self.current_interval,
            consecutive_errors: self.consecutive_errors,
            last_signal: self.last_signal.clone(),
            same_signal_count: self.same_signal_count,
            started_at: self.started_at,
            last_data: self.last_data.clone(),
            last_error: self.last_error.clone(),
            outcome: self.outcome.clone(),
        }
    }
}
