//! The polling state machine.
//!
//! A [`PollingController`] owns one session at a time. `start()` spawns a
//! driver future on the current tokio runtime; the driver fetches, updates
//! its private copy of the session, publishes a clone through a
//! [`watch`](tokio::sync::watch) channel, runs the callbacks, and only then
//! sleeps until the next tick. Because the next fetch is scheduled after the
//! current one resolves, fetches never overlap and a slow provider slows the
//! loop down with it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::polling::backoff::{BackoffPolicy, JitterSource, RandomJitter};
use crate::polling::classify::ErrorClassifier;
use crate::polling::error::{ControllerError, PollError};
use crate::polling::options::PollingOptions;
use crate::polling::provider::StatusProvider;
use crate::polling::session::{Phase, PollOutcome, PollingSession, StallReport};
use crate::polling::stuck::{ProgressSignal, ProgressStuckDetector, StuckVerdict};

type Session<P> = PollingSession<<P as StatusProvider>::Snapshot, <P as StatusProvider>::Failure>;
type Outcome<P> = PollOutcome<<P as StatusProvider>::Snapshot, <P as StatusProvider>::Failure>;

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type SignalFn<T> = Arc<dyn Fn(&T) -> Option<ProgressSignal> + Send + Sync>;
type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

struct Hooks<T, E> {
    stop_condition: Option<Predicate<T>>,
    progress_signal: Option<SignalFn<T>>,
    on_snapshot: Option<Callback<PollingSession<T, E>>>,
    on_success: Option<Callback<T>>,
    on_error: Option<Callback<PollError<E>>>,
    on_stall: Option<Callback<StallReport>>,
    on_finish: Option<Callback<PollOutcome<T, E>>>,
}

impl<T, E> Default for Hooks<T, E> {
    fn default() -> Self {
        Self {
            stop_condition: None,
            progress_signal: None,
            on_snapshot: None,
            on_success: None,
            on_error: None,
            on_stall: None,
            on_finish: None,
        }
    }
}

impl<T, E> Clone for Hooks<T, E> {
    fn clone(&self) -> Self {
        Self {
            stop_condition: self.stop_condition.clone(),
            progress_signal: self.progress_signal.clone(),
            on_snapshot: self.on_snapshot.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_stall: self.on_stall.clone(),
            on_finish: self.on_finish.clone(),
        }
    }
}

/// Stops a session from anywhere, including from inside a callback.
///
/// A handle belongs to the session that was current (or next to start) when
/// it was taken; after `reset()` take a new one.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    /// Stop the session. No fetch is issued after this returns.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether `stop()` has been called on this session.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Watches one remote job until it finishes, fails, or is given up on.
///
/// # Examples
///
/// ```rust
/// use tidewatch::{from_fn, PollOutcome, PollingController, PollingOptions};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let calls = Arc::new(AtomicU32::new(0));
/// let provider = from_fn({
///     let calls = calls.clone();
///     move || {
///         let n = calls.fetch_add(1, Ordering::SeqCst);
///         async move {
///             Ok::<_, String>(if n < 2 { "processing" } else { "completed" })
///         }
///     }
/// });
///
/// let mut controller = PollingController::new(provider)
///     .named("report-7")
///     .stop_when(|status: &&str| *status == "completed");
/// controller
///     .configure(PollingOptions::default().with_base_interval(Duration::from_millis(1)))
///     .unwrap();
/// controller.start().unwrap();
///
/// let outcome = controller.wait().await;
/// assert!(matches!(outcome, PollOutcome::Completed("completed")));
/// assert_eq!(controller.attempts(), 3);
/// # });
/// ```
pub struct PollingController<P: StatusProvider> {
    provider: Arc<P>,
    options: PollingOptions,
    hooks: Hooks<P::Snapshot, P::Failure>,
    jitter: Arc<dyn JitterSource>,
    name: Option<String>,
    state: Arc<watch::Sender<Session<P>>>,
    cancel: CancellationToken,
    next_session_id: u64,
}

impl<P: StatusProvider> fmt::Debug for PollingController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingController")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("phase", &self.phase())
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

impl<P: StatusProvider> PollingController<P> {
    /// A controller with default options and no callbacks.
    pub fn new(provider: P) -> Self {
        let options = PollingOptions::default();
        let (state, _) = watch::channel(PollingSession::idle(options.base_interval));
        Self {
            provider: Arc::new(provider),
            options,
            hooks: Hooks::default(),
            jitter: Arc::new(RandomJitter),
            name: None,
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            next_session_id: 1,
        }
    }

    /// Label used in log events.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the jitter source used for backoff intervals.
    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// The predicate that decides the job is done.
    ///
    /// Without one, a session only ends through its limits, the stuck
    /// heuristic, a fatal failure, or `stop()`.
    pub fn stop_when(mut self, f: impl Fn(&P::Snapshot) -> bool + Send + Sync + 'static) -> Self {
        self.hooks.stop_condition = Some(Arc::new(f));
        self
    }

    /// How to read a progress signal out of a snapshot.
    pub fn progress_signal(
        mut self,
        f: impl Fn(&P::Snapshot) -> Option<ProgressSignal> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.progress_signal = Some(Arc::new(f));
        self
    }

    /// Called once per tick with the updated session.
    pub fn on_snapshot(
        mut self,
        f: impl Fn(&PollingSession<P::Snapshot, P::Failure>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_snapshot = Some(Arc::new(f));
        self
    }

    /// Called with every successfully fetched snapshot.
    pub fn on_success(mut self, f: impl Fn(&P::Snapshot) + Send + Sync + 'static) -> Self {
        self.hooks.on_success = Some(Arc::new(f));
        self
    }

    /// Called with every failure; check [`PollError::is_terminal`] to tell
    /// retries from the end of the session.
    pub fn on_error(mut self, f: impl Fn(&PollError<P::Failure>) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(f));
        self
    }

    /// Called on every tick where progress is stalled but polling continues.
    pub fn on_stall(mut self, f: impl Fn(&StallReport) + Send + Sync + 'static) -> Self {
        self.hooks.on_stall = Some(Arc::new(f));
        self
    }

    /// Called once when the session ends by itself. Not called when the
    /// owner stops it.
    pub fn on_finish(
        mut self,
        f: impl Fn(&PollOutcome<P::Snapshot, P::Failure>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_finish = Some(Arc::new(f));
        self
    }

    /// Replace the options without validating them; `start()` validates.
    pub fn with_options(mut self, options: PollingOptions) -> Self {
        self.options = options;
        self.refresh_idle_interval();
        self
    }

    /// Replace the options. Must happen before `start()`.
    pub fn configure(&mut self, options: PollingOptions) -> Result<(), ControllerError> {
        if self.phase() == Phase::Polling {
            return Err(ControllerError::AlreadyPolling);
        }
        options.validate()?;
        self.options = options;
        self.refresh_idle_interval();
        Ok(())
    }

    fn refresh_idle_interval(&self) {
        let base = self.options.base_interval;
        self.state.send_if_modified(|s| {
            if s.phase == Phase::Idle {
                s.current_interval = base;
                true
            } else {
                false
            }
        });
    }

    /// The current options.
    pub fn options(&self) -> &PollingOptions {
        &self.options
    }

    /// Begin polling. Does nothing if already polling.
    ///
    /// The first fetch happens immediately. A stopped session has to be
    /// `reset()` first.
    pub fn start(&mut self) -> Result<(), ControllerError> {
        match self.phase() {
            Phase::Polling => return Ok(()),
            Phase::Stopped => return Err(ControllerError::NotReset),
            Phase::Idle => {}
        }
        self.options.validate()?;
        let runtime = Handle::try_current().map_err(|_| ControllerError::NoRuntime)?;

        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        let id = self.next_session_id;
        self.next_session_id += 1;

        let session = PollingSession::started(id, self.options.base_interval, Instant::now());
        self.state.send_replace(session.clone());

        let driver = Driver {
            provider: Arc::clone(&self.provider),
            hooks: self.hooks.clone(),
            max_attempts: self.options.max_attempts,
            max_duration: self.options.max_duration,
            backoff: self.options.backoff_policy(),
            classifier: self.options.classifier(),
            detector: ProgressStuckDetector::new(self.options.stuck_detection.clone()),
            jitter: Arc::clone(&self.jitter),
            session,
            state: Arc::clone(&self.state),
            token: self.cancel.clone(),
        };

        let span = tracing::info_span!("poll_session", job = %self.label(), session = id);
        runtime.spawn(driver.run().instrument(span));
        Ok(())
    }

    /// Stop polling. Idempotent; a pending tick is cancelled and no further
    /// fetch is issued.
    pub fn stop(&self) {
        self.cancel.cancel();
        let stopped = self.state.send_if_modified(|s| {
            if s.phase == Phase::Polling {
                s.finish(PollOutcome::Cancelled);
                true
            } else {
                false
            }
        });
        if stopped {
            tracing::debug!(job = %self.label(), "polling stopped by owner");
        }
    }

    /// Stop if needed and clear the session back to `Idle`.
    pub fn reset(&mut self) {
        self.stop();
        self.cancel = CancellationToken::new();
        self.state
            .send_replace(PollingSession::idle(self.options.base_interval));
    }

    /// A handle that stops the current session.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.cancel.clone(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    /// Completed fetches in the current session.
    pub fn attempts(&self) -> u32 {
        self.state.borrow().attempts
    }

    /// The most recent successful snapshot.
    pub fn last_data(&self) -> Option<P::Snapshot> {
        self.state.borrow().last_data.clone()
    }

    /// The most recent failure since the last success.
    pub fn last_error(&self) -> Option<PollError<P::Failure>> {
        self.state.borrow().last_error.clone()
    }

    /// How the session ended, once it has.
    pub fn outcome(&self) -> Option<Outcome<P>> {
        self.state.borrow().outcome.clone()
    }

    /// A copy of the whole session.
    pub fn session(&self) -> Session<P> {
        self.state.borrow().clone()
    }

    /// Receive a new session copy after every tick.
    pub fn subscribe(&self) -> watch::Receiver<Session<P>> {
        self.state.subscribe()
    }

    /// Wait until the session ends.
    ///
    /// On an idle controller this waits for a session to be started
    /// elsewhere and then end.
    pub async fn wait(&self) -> Outcome<P> {
        let mut rx = self.state.subscribe();
        let ended = rx.wait_for(|s| s.outcome.is_some()).await;
        match ended {
            Ok(session) => session.outcome.clone().unwrap_or(PollOutcome::Cancelled),
            Err(_) => PollOutcome::Cancelled,
        }
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

impl<P: StatusProvider> Drop for PollingController<P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build, start, and wait for a controller in one call.
///
/// # Examples
///
/// ```rust
/// use tidewatch::{from_fn, poll_until, PollingOptions};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let provider = from_fn(|| async { Ok::<_, String>(100u8) });
/// let options = PollingOptions::default().with_base_interval(Duration::from_millis(1));
///
/// let outcome = poll_until(provider, options, |pct: &u8| *pct == 100).await.unwrap();
/// assert_eq!(outcome.data(), Some(&100));
/// # });
/// ```
pub async fn poll_until<P, C>(
    provider: P,
    options: PollingOptions,
    stop_condition: C,
) -> Result<Outcome<P>, ControllerError>
where
    P: StatusProvider,
    C: Fn(&P::Snapshot) -> bool + Send + Sync + 'static,
{
    let mut controller = PollingController::new(provider).stop_when(stop_condition);
    controller.configure(options)?;
    controller.start()?;
    Ok(controller.wait().await)
}

/// What one tick produced, for the callbacks.
struct TickReport<T, E> {
    data: Option<T>,
    error: Option<PollError<E>>,
    stall: Option<StallReport>,
}

impl<T, E> TickReport<T, E> {
    fn empty() -> Self {
        Self {
            data: None,
            error: None,
            stall: None,
        }
    }
}

struct Driver<P: StatusProvider> {
    provider: Arc<P>,
    hooks: Hooks<P::Snapshot, P::Failure>,
    max_attempts: Option<u32>,
    max_duration: Duration,
    backoff: BackoffPolicy,
    classifier: ErrorClassifier,
    detector: ProgressStuckDetector,
    jitter: Arc<dyn JitterSource>,
    session: Session<P>,
    state: Arc<watch::Sender<Session<P>>>,
    token: CancellationToken,
}

impl<P: StatusProvider> Driver<P> {
    async fn run(mut self) {
        tracing::debug!("polling started");
        loop {
            if self.token.is_cancelled() {
                return self.cancelled();
            }
            let report = match self.check_deadline() {
                Some(report) => report,
                None => {
                    let deadline = self.deadline();
                    let fetched = tokio::select! {
                        biased;
                        _ = self.token.cancelled() => return self.cancelled(),
                        result = async {
                            tokio::time::timeout_at(deadline, self.provider.fetch_status()).await
                        } => result,
                    };
                    match fetched {
                        Ok(Ok(data)) => self.handle_success(data),
                        Ok(Err(failure)) => self.handle_failure(failure),
                        Err(_) => self.fetch_timed_out(),
                    }
                }
            };

            if !self.publish() {
                return;
            }
            self.dispatch(report);
            if self.session.is_finished() {
                return;
            }

            let interval = self.session.current_interval;
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return self.cancelled(),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    fn check_deadline(&mut self) -> Option<TickReport<P::Snapshot, P::Failure>> {
        if self.session.elapsed() <= self.max_duration {
            return None;
        }
        Some(self.timed_out())
    }

    /// When the session runs out of time; in-flight fetches are abandoned here.
    fn deadline(&self) -> Instant {
        self.session.started_at.unwrap_or_else(Instant::now) + self.max_duration
    }

    fn fetch_timed_out(&mut self) -> TickReport<P::Snapshot, P::Failure> {
        tracing::warn!(
            attempts = self.session.attempts,
            "status fetch still pending at the deadline"
        );
        self.timed_out()
    }

    fn timed_out(&mut self) -> TickReport<P::Snapshot, P::Failure> {
        let elapsed = self.session.elapsed();
        let err = PollError::TimeoutExceeded {
            elapsed,
            max_duration: self.max_duration,
        };
        tracing::error!(
            ?elapsed,
            attempts = self.session.attempts,
            "polling exceeded its maximum duration"
        );
        self.fail(err)
    }

    fn handle_success(&mut self, data: P::Snapshot) -> TickReport<P::Snapshot, P::Failure> {
        let session = &mut self.session;
        session.attempts += 1;
        session.consecutive_errors = 0;
        session.current_interval = self.backoff.base();
        session.last_error = None;
        session.last_data = Some(data.clone());

        let signal = self
            .hooks
            .progress_signal
            .as_ref()
            .and_then(|extract| extract(&data));
        let verdict = self.detector.observe(signal, session.attempts);
        session.last_signal = self.detector.last_signal().cloned();
        session.same_signal_count = self.detector.same_signal_count();
        let attempts = session.attempts;
        tracing::debug!(attempts, interval = ?session.current_interval, "status fetched");

        let mut report = TickReport::empty();
        let done = self
            .hooks
            .stop_condition
            .as_ref()
            .is_some_and(|stop| stop(&data));

        if done {
            tracing::info!(attempts, "job reported completion");
            self.session.finish(PollOutcome::Completed(data.clone()));
        } else {
            match verdict {
                StuckVerdict::ForceStop { same_count } => {
                    tracing::info!(
                        attempts,
                        same_count,
                        "progress plateaued near completion, assuming the job finished"
                    );
                    self.session.finish(PollOutcome::LikelyComplete {
                        data: data.clone(),
                        same_signal_count: same_count,
                    });
                }
                StuckVerdict::Stalled { same_count } => {
                    tracing::warn!(attempts, same_count, "progress not advancing");
                    report.stall = self.detector.last_signal().cloned().map(|signal| StallReport {
                        signal,
                        same_count,
                        attempts,
                    });
                }
                StuckVerdict::Advancing => {}
            }

            if !self.session.is_finished() && self.attempts_exhausted() {
                let err = PollError::MaxAttemptsExhausted {
                    attempts,
                    last_failure: None,
                };
                report.error = self.fail(err).error;
            }
        }

        report.data = Some(data);
        report
    }

    fn handle_failure(&mut self, failure: P::Failure) -> TickReport<P::Snapshot, P::Failure> {
        self.session.attempts += 1;
        self.session.consecutive_errors += 1;

        let classification = self.classifier.classify(&failure);
        let failure = Arc::new(failure);
        let err = PollError::from_failure(
            Arc::clone(&failure),
            classification.code,
            classification.retryable,
        );

        if !classification.retryable {
            tracing::error!(code = ?classification.code, error = %err, "fatal failure, giving up");
            return self.fail(err);
        }

        if self.attempts_exhausted() {
            tracing::error!(attempts = self.session.attempts, error = %err, "attempts exhausted");
            return self.fail(PollError::MaxAttemptsExhausted {
                attempts: self.session.attempts,
                last_failure: Some(failure),
            });
        }

        let interval = self
            .backoff
            .next_interval(self.session.consecutive_errors, &*self.jitter);
        self.session.current_interval = interval;
        self.session.last_error = Some(err.clone());
        tracing::warn!(
            attempts = self.session.attempts,
            consecutive_errors = self.session.consecutive_errors,
            retry_in = ?interval,
            error = %err,
            "status fetch failed, retrying"
        );

        TickReport {
            error: Some(err),
            ..TickReport::empty()
        }
    }

    /// End the session with a terminal error.
    fn fail(&mut self, err: PollError<P::Failure>) -> TickReport<P::Snapshot, P::Failure> {
        self.session.last_error = Some(err.clone());
        self.session.finish(PollOutcome::Failed(err.clone()));
        TickReport {
            error: Some(err),
            ..TickReport::empty()
        }
    }

    fn attempts_exhausted(&self) -> bool {
        self.max_attempts
            .is_some_and(|max| self.session.attempts >= max)
    }

    /// Copy the session out to observers unless it was stopped or replaced.
    fn publish(&self) -> bool {
        let token = &self.token;
        let session = &self.session;
        self.state.send_if_modified(|current| {
            if current.id != session.id || token.is_cancelled() {
                return false;
            }
            *current = session.clone();
            true
        })
    }

    fn dispatch(&self, report: TickReport<P::Snapshot, P::Failure>) {
        let hooks = &self.hooks;
        if let (Some(cb), Some(data)) = (&hooks.on_success, &report.data) {
            cb(data);
        }
        if let (Some(cb), Some(err)) = (&hooks.on_error, &report.error) {
            cb(err);
        }
        if let (Some(cb), Some(stall)) = (&hooks.on_stall, &report.stall) {
            cb(stall);
        }
        if let Some(cb) = &hooks.on_snapshot {
            cb(&self.session);
        }
        if let (Some(cb), Some(outcome)) = (&hooks.on_finish, &self.session.outcome) {
            cb(outcome);
        }
    }

    fn cancelled(&self) {
        let id = self.session.id;
        let stopped = self.state.send_if_modified(|current| {
            if current.id == id && current.phase == Phase::Polling {
                current.finish(PollOutcome::Cancelled);
                true
            } else {
                false
            }
        });
        if stopped {
            tracing::debug!("polling stopped through a stop handle");
        }
    }
}
