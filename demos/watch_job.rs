//! Watches three simulated remote jobs at once.
//!
//! - `report` finishes after a few ticks
//! - `render` stalls at 97% and is treated as likely complete
//! - `export` hits two 503s, then a 404 that ends the session
//!
//! Run with: cargo run --example watch_job
//! Set RUST_LOG=tidewatch=debug to see every tick.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tidewatch::prelude::*;
use tidewatch::FnProvider;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct JobStatus {
    status: &'static str,
    progress_percentage: f64,
}

impl JobStatus {
    fn new(status: &'static str, progress_percentage: f64) -> Self {
        Self {
            status,
            progress_percentage,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.status, "completed" | "failed")
    }
}

type Fetch = futures::future::Ready<Result<JobStatus, HttpFailure>>;

/// A fake backend whose answer depends on how many times it has been asked.
fn simulated(
    script: impl Fn(u32) -> Result<JobStatus, HttpFailure> + Send + Sync + 'static,
) -> FnProvider<impl Fn() -> Fetch + Send + Sync + 'static> {
    let calls = Arc::new(AtomicU32::new(0));
    from_fn(move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(script(n))
    })
}

fn options() -> PollingOptions {
    PollingOptions::default()
        .with_base_interval(Duration::from_millis(100))
        .with_max_backoff_interval(Duration::from_secs(1))
        .with_max_duration(Duration::from_secs(30))
        .with_stuck_threshold(3)
}

fn describe(name: &str, outcome: &PollOutcome<JobStatus, HttpFailure>) {
    match outcome {
        PollOutcome::Completed(status) => {
            tracing::info!(job = name, status = status.status, "finished")
        }
        PollOutcome::LikelyComplete {
            data,
            same_signal_count,
        } => tracing::info!(
            job = name,
            progress = data.progress_percentage,
            same_signal_count,
            "assumed finished"
        ),
        PollOutcome::Failed(err) => tracing::error!(job = name, error = %err, "gave up"),
        PollOutcome::Cancelled => tracing::info!(job = name, "cancelled"),
    }
}

async fn watch<P>(name: &'static str, provider: P) -> Result<(), ControllerError>
where
    P: StatusProvider<Snapshot = JobStatus, Failure = HttpFailure>,
{
    let mut controller = PollingController::new(provider)
        .named(name)
        .stop_when(JobStatus::is_terminal)
        .progress_signal(|s: &JobStatus| Some(ProgressSignal::percent(s.progress_percentage)))
        .on_stall(move |stall| {
            tracing::info!(job = name, attempts = stall.attempts, "still waiting on a stalled job")
        });
    controller.configure(options())?;
    controller.start()?;

    let outcome = controller.wait().await;
    describe(name, &outcome);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let report = simulated(|n| {
        Ok(match n {
            0..=1 => JobStatus::new("processing", 30.0 * f64::from(n)),
            2 => JobStatus::new("processing", 90.0),
            _ => JobStatus::new("completed", 100.0),
        })
    });

    let render = simulated(|n| {
        Ok(JobStatus::new(
            "processing",
            if n < 2 { 50.0 } else { 97.0 },
        ))
    });

    let export = simulated(|n| match n {
        0 => Ok(JobStatus::new("processing", 10.0)),
        1 | 2 => Err(HttpFailure::new("upstream busy").with_status(503)),
        _ => Err(HttpFailure::new("job no longer exists").with_status(404)),
    });

    let (a, b, c) = tokio::join!(
        watch("report", report),
        watch("render", render),
        watch("export", export),
    );
    a.and(b).and(c)
}
