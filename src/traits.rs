use async_trait::async_trait;
use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;

use crate::budget::TimeBudget;
use crate::types::FetchReply;

// For types that are in charge of resolving a batch of keys against the
// backing store. One implementation per entity type, injected into each
// loader instance by the service layer.
#[async_trait]
pub trait BatchFetcher: Sized + Send + Sync + 'static {
    /// The key type to be used with methods like [`Loader::load()`](crate::Loader::load).
    ///
    /// Unique within one batch; opaque to the loader beyond hashing and
    /// equality.
    type Key: Debug + Display + Hash + Clone + Eq + Sized + Send + Sync + 'static;
    type Value: Debug + Clone + Send + Sync + 'static;
    type Error: Display + Debug + Send + Sync + 'static;

    /// Resolve every key in `keys` in one round trip.
    ///
    /// The reply MUST contain an entry for each requested key, with
    /// [`Fetched::Missing`](crate::types::Fetched::Missing) marking a clean
    /// miss. Order carries no meaning; the loader only ever consults the
    /// reply by key. `budget` is the innermost slice of the request
    /// deadline — implementations going to the network should bound their
    /// work by it.
    async fn fetch(&self, keys: Vec<Self::Key>, budget: &TimeBudget) -> Result<FetchReply<Self>, Self::Error>;
}
