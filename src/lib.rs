//! # rq-accel
//!
//! In-app performance layer for query-serving APIs: request batching,
//! response caching, and deadline budgeting in one crate.
//!
//! Think of it as the shock absorber between your resolver tier and your
//! backends.
//!
//! # What's In It For Me?
//!
//! Three chronic problems of data APIs, handled in-process:
//!
//! | Problem | Component | Mechanism |
//! | ------- | --------- | --------- |
//! | N+1 fetch amplification | [`Loader`] | coalesces concurrent point lookups into batched fetches, deduplicated per request |
//! | Recomputing identical responses | [`ResponseCache`] | tenant-isolated fingerprint cache with per-entry TTL and LRU bounds |
//! | Unbounded tail latency | [`TimeBudget`](budget::TimeBudget) | cascading deadlines, shrinking from ingress to the innermost fetch |
//!
//! # The Basics
//!
//! The crate is designed for the following use case:
//!
//! - A resolver-style serving layer (GraphQL, RPC, REST aggregation) fanning
//!   out into key-indexed backend lookups.
//! - Unsatisfactory latency from repeated single-key round trips within one
//!   request.
//! - Responses that are expensive to compute but stable enough to reuse
//!   across requests, per tenant.
//!
//! It operates on the following principles:
//!
//! - Backend-agnostic: batching goes through one injected
//!   [`BatchFetcher`] implementation per entity type — constructor
//!   injection, no global registry.
//! - Request scope is the isolation boundary: a
//!   [`RequestScope`](scope::RequestScope) and its loaders live exactly as
//!   long as one request, so memoized values can never leak between
//!   requests.
//! - The response cache is process-wide by design, implemented as a
//!   controller over the [moka](https://crates.io/crates/moka) cache,
//!   constructed once and handed to every request context.
//! - Deadlines only shrink: every layer derives its slice from its caller's
//!   budget and fails fast once it is gone. Fully async, no polling loops.
//! - Fail-closed: when a choice arises between serving questionable data
//!   and failing the request, the request fails.
//!
//! # Wiring It Up
//!
//! ```ignore
//! // Process start: one cache, one invalidator.
//! let cache = ResponseCache::<serde_json::Value>::builder()
//!     .name("responses")
//!     .max_capacity(50_000)
//!     .build()?;
//! let invalidator = cache.invalidator(
//!     InvalidationRules::new().on_rule("createNote", "notes:*"),
//!     UnknownCategoryPolicy::PurgeAll,
//! );
//!
//! // Request start: a scope with the transport deadline.
//! let scope = RequestScope::builder()
//!     .budget(TimeBudget::root(Duration::from_secs(1)))
//!     .build()?;
//! let authors = scope.loader(AuthorFetcher::new(pool)).name("authors").build()?;
//!
//! // Field resolution: batched, deduplicated point lookups.
//! let author = authors.load(author_id).await?;
//!
//! // Mutation commit: prune what the mutation made stale.
//! invalidator.invalidate("createNote", &[user_id]).await;
//! ```

pub mod budget;
pub mod fingerprint;
pub mod invalidator;
pub mod loader;
pub mod response;
pub mod scope;
pub mod stats;
pub mod testkit;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use loader::Loader;
#[doc(inline)]
pub use response::ResponseCache;
#[doc(inline)]
pub use traits::BatchFetcher;

pub mod prelude {
    pub use crate::budget::{stage, BudgetPolicy, TimeBudget};
    pub use crate::fingerprint::{CacheKey, FingerprintError};
    pub use crate::invalidator::{InvalidationPattern, InvalidationRules, Invalidator, UnknownCategoryPolicy};
    pub use crate::loader::Loader;
    pub use crate::response::ResponseCache;
    pub use crate::scope::RequestScope;
    pub use crate::traits::BatchFetcher;
    pub use crate::types::*;
}
