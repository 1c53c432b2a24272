use crate::traits::BatchFetcher;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Reply for a single key of a batch fetch: either the backend value or an
/// explicit miss. A key absent from the reply map altogether is a contract
/// violation and is surfaced as [`LoadError::MissingKey`], never as a miss.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetched<V> {
    Hit(V),
    Missing,
}

impl<V> Fetched<V> {
    pub fn into_option(self) -> Option<V> {
        match self {
            Self::Hit(v) => Some(v),
            Self::Missing => None,
        }
    }
}

/// The full reply of one [`BatchFetcher::fetch`](crate::traits::BatchFetcher::fetch) call.
pub type FetchReply<F> = HashMap<<F as BatchFetcher>::Key, Fetched<<F as BatchFetcher>::Value>>;

/// What a single [`Loader::load`](crate::loader::Loader::load) resolves to.
/// `Ok(None)` is the explicit not-found outcome and is expected to be handled
/// by resolvers (e.g. rendered as null); it is never folded into an error.
pub type LoadOutcome<F> =
    Result<Option<<F as BatchFetcher>::Value>, LoadError<<F as BatchFetcher>::Error>>;

/// Errors surfaced by loader operations.
#[derive(Error, Debug)]
pub enum LoadError<E> {
    /// The injected fetcher failed as a whole; every pending request of the
    /// affected batch carries the same error.
    #[error("batch fetch failed: {0}")]
    Fetch(Arc<E>),

    /// The fetcher reply omitted a requested key instead of marking it
    /// missing explicitly.
    #[error("fetcher reply omitted key '{0}'")]
    MissingKey(String),

    /// The time budget ran out before the load could complete.
    #[error("time budget '{0}' exhausted")]
    TimedOut(String),

    /// The pending request was dropped before resolution. Not produced in
    /// normal operation; kept so a lost waiter fails loudly instead of
    /// hanging.
    #[error("load canceled before resolution")]
    Canceled,
}

impl<E> Clone for LoadError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Fetch(e) => Self::Fetch(Arc::clone(e)),
            Self::MissingKey(k) => Self::MissingKey(k.clone()),
            Self::TimedOut(l) => Self::TimedOut(l.clone()),
            Self::Canceled => Self::Canceled,
        }
    }
}

impl<E> LoadError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}
