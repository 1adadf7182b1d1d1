//! Testing utilities for code built on tidewatch.
//!
//! - [`ScriptedProvider`]: a [`StatusProvider`] that replays a fixed script
//!   of results and counts how often it was called.
//! - [`SequenceJitter`]: a [`JitterSource`] that cycles through fixed factors.
//!
//! # Examples
//!
//! ```rust
//! use tidewatch::testing::ScriptedProvider;
//! use tidewatch::StatusProvider;
//!
//! # tokio_test::block_on(async {
//! let provider = ScriptedProvider::new()
//!     .then_err(String::from("status code 503"))
//!     .then_ok("processing")
//!     .then_ok("completed");
//!
//! assert!(provider.fetch_status().await.is_err());
//! assert_eq!(provider.fetch_status().await, Ok("processing"));
//! assert_eq!(provider.fetch_status().await, Ok("completed"));
//! // the last step repeats
//! assert_eq!(provider.fetch_status().await, Ok("completed"));
//! assert_eq!(provider.fetch_count(), 4);
//! # });
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::polling::{Failure, JitterSource, StatusProvider};

struct Script<T, E> {
    steps: VecDeque<Result<T, E>>,
    last: Option<Result<T, E>>,
}

/// A provider that returns scripted results in order and then keeps
/// returning the final one.
///
/// Clones share the script and the fetch counter.
pub struct ScriptedProvider<T, E> {
    script: Arc<Mutex<Script<T, E>>>,
    fetches: Arc<AtomicU32>,
    latency: Option<Duration>,
}

impl<T, E> Clone for ScriptedProvider<T, E> {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
            fetches: Arc::clone(&self.fetches),
            latency: self.latency,
        }
    }
}

impl<T, E> fmt::Debug for ScriptedProvider<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("fetches", &self.fetch_count())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl<T, E> Default for ScriptedProvider<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> ScriptedProvider<T, E> {
    /// An empty script. Fetching from it panics.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                steps: VecDeque::new(),
                last: None,
            })),
            fetches: Arc::new(AtomicU32::new(0)),
            latency: None,
        }
    }

    /// Append a step.
    pub fn then(self, step: Result<T, E>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .steps
            .push_back(step);
        self
    }

    /// Append a successful snapshot.
    pub fn then_ok(self, snapshot: T) -> Self {
        self.then(Ok(snapshot))
    }

    /// Append a failure.
    pub fn then_err(self, failure: E) -> Self {
        self.then(Err(failure))
    }

    /// Append the same step `times` times.
    pub fn repeat(mut self, step: Result<T, E>, times: usize) -> Self
    where
        T: Clone,
        E: Clone,
    {
        for _ in 0..times {
            self = self.then(step.clone());
        }
        self
    }

    /// Sleep this long inside every fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// How many times `fetch_status` has been called.
    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Result<T, E>
    where
        T: Clone,
        E: Clone,
    {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        match script.steps.pop_front() {
            Some(step) => {
                script.last = Some(step.clone());
                step
            }
            None => script
                .last
                .clone()
                .expect("ScriptedProvider fetched with an empty script"),
        }
    }
}

impl<T, E> StatusProvider for ScriptedProvider<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Failure + Clone + fmt::Debug + Send + Sync + 'static,
{
    type Snapshot = T;
    type Failure = E;

    fn fetch_status(&self) -> BoxFuture<'_, Result<T, E>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self.next_step();
        let latency = self.latency;
        async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            step
        }
        .boxed()
    }
}

/// Jitter that cycles through a fixed list of factors.
#[derive(Debug)]
pub struct SequenceJitter {
    factors: Vec<f64>,
    next: AtomicUsize,
}

impl SequenceJitter {
    /// Cycle through `factors`. An empty list behaves like no jitter.
    pub fn new(factors: impl IntoIterator<Item = f64>) -> Self {
        Self {
            factors: factors.into_iter().collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl JitterSource for SequenceJitter {
    fn factor(&self, low: f64, high: f64) -> f64 {
        if self.factors.is_empty() {
            return 1.0_f64.clamp(low, high.max(low));
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.factors.len();
        self.factors[i].clamp(low, high.max(low))
    }
}
