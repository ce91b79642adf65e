use std::fmt;

use futures::future::{self, BoxFuture, FutureExt};

/// A result that is either available now or still pending.
///
/// Storage backends may answer synchronously or asynchronously. Evaluation stays on the
/// synchronous path for as long as every answer it depends on is [MaybeAsync::Ready], and only
/// boxes a future once some input is [MaybeAsync::Pending].
pub enum MaybeAsync<'a, T> {
    Ready(T),
    Pending(BoxFuture<'a, T>),
}

impl<'a, T: Send + 'a> MaybeAsync<'a, T> {
    /// Wrap a future as a pending result.
    pub fn pending<F>(future: F) -> Self
    where
        F: future::Future<Output = T> + Send + 'a,
    {
        MaybeAsync::Pending(future.boxed())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, MaybeAsync::Ready(_))
    }

    /// The value, if it is available without waiting.
    pub fn ready(self) -> Option<T> {
        match self {
            MaybeAsync::Ready(value) => Some(value),
            MaybeAsync::Pending(_) => None,
        }
    }

    pub fn into_future(self) -> BoxFuture<'a, T> {
        match self {
            MaybeAsync::Ready(value) => future::ready(value).boxed(),
            MaybeAsync::Pending(future) => future,
        }
    }

    pub fn map<U, F>(self, f: F) -> MaybeAsync<'a, U>
    where
        U: Send + 'a,
        F: FnOnce(T) -> U + Send + 'a,
    {
        match self {
            MaybeAsync::Ready(value) => MaybeAsync::Ready(f(value)),
            MaybeAsync::Pending(future) => MaybeAsync::Pending(future.map(f).boxed()),
        }
    }

    pub fn and_then<U, F>(self, f: F) -> MaybeAsync<'a, U>
    where
        U: Send + 'a,
        F: FnOnce(T) -> MaybeAsync<'a, U> + Send + 'a,
    {
        match self {
            MaybeAsync::Ready(value) => f(value),
            MaybeAsync::Pending(future) => {
                MaybeAsync::pending(async move { f(future.await).into_future().await })
            }
        }
    }

    /// Collect every result. Stays synchronous when all inputs are ready; otherwise waits for all
    /// pending inputs concurrently.
    pub fn join_all(results: Vec<MaybeAsync<'a, T>>) -> MaybeAsync<'a, Vec<T>> {
        if results.iter().all(MaybeAsync::is_ready) {
            return MaybeAsync::Ready(results.into_iter().filter_map(MaybeAsync::ready).collect());
        }
        let futures = results.into_iter().map(MaybeAsync::into_future);
        MaybeAsync::pending(future::join_all(futures))
    }
}

impl<'a, T: fmt::Debug> fmt::Debug for MaybeAsync<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaybeAsync::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            MaybeAsync::Pending(_) => f.write_str("Pending"),
        }
    }
}

impl<'a, T> From<T> for MaybeAsync<'a, T> {
    fn from(value: T) -> Self {
        MaybeAsync::Ready(value)
    }
}
