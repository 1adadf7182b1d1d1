//! The status-fetching operation a controller polls.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::polling::classify::Failure;

/// Fetches the current status of one remote job.
///
/// Implementations must be safe to call repeatedly and must not fail on
/// ordinary "still running" states; only infrastructure or backend errors
/// should come back as `Err`.
pub trait StatusProvider: Send + Sync + 'static {
    /// A status snapshot.
    type Snapshot: Clone + Send + Sync + 'static;
    /// A failure to fetch one.
    type Failure: Failure + fmt::Debug + Send + Sync + 'static;

    /// Fetch the current status once.
    fn fetch_status(&self) -> BoxFuture<'_, Result<Self::Snapshot, Self::Failure>>;
}

impl<P: StatusProvider> StatusProvider for Arc<P> {
    type Snapshot = P::Snapshot;
    type Failure = P::Failure;

    fn fetch_status(&self) -> BoxFuture<'_, Result<Self::Snapshot, Self::Failure>> {
        (**self).fetch_status()
    }
}

/// A [`StatusProvider`] built from an async closure. See [`from_fn`].
pub struct FnProvider<F> {
    fetch: F,
}

impl<F> fmt::Debug for FnProvider<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProvider").finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`StatusProvider`].
///
/// # Examples
///
/// ```rust
/// use tidewatch::{from_fn, StatusProvider};
///
/// let provider = from_fn(|| async { Ok::<_, String>("processing") });
///
/// # tokio_test::block_on(async {
/// assert_eq!(provider.fetch_status().await, Ok("processing"));
/// # });
/// ```
pub fn from_fn<F, Fut, T, E>(fetch: F) -> FnProvider<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    FnProvider { fetch }
}

impl<F, Fut, T, E> StatusProvider for FnProvider<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Failure + fmt::Debug + Send + Sync + 'static,
{
    type Snapshot = T;
    type Failure = E;

    fn fetch_status(&self) -> BoxFuture<'_, Result<T, E>> {
        (self.fetch)().boxed()
    }
}
