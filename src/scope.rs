use crate::budget::{stage, TimeBudget};
use crate::loader::{Loader, LoaderBuilder};
use crate::traits::BatchFetcher;
use fieldx_plus::fx_plus;
use std::sync::Arc;

/// Per-request isolation boundary.
///
/// Created at request ingress with the transport deadline, torn down with
/// the request. Loaders built through a scope inherit a child slice of its
/// budget and, with it, the scope's lifetime — which is what keeps one
/// request's memoized values out of every other request. Never stash a
/// scope (or a loader) anywhere that outlives the request.
///
/// ```ignore
/// let scope = RequestScope::builder()
///     .budget(TimeBudget::root_with_policy(deadline, policy))
///     .build()?;
///
/// let authors = scope.loader(AuthorFetcher::new(pool)).name("authors").build()?;
/// let notes = scope.loader(NoteFetcher::new(pool)).name("notes").build()?;
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    rc,
    builder(
        doc("Builder object of [`RequestScope`].", "", "See [`RequestScope::builder()`] method."),
        method_doc("Implement builder pattern for [`RequestScope`]."),
    )
)]
pub struct RequestScope {
    /// The request's root time allowance, set at ingress.
    #[fieldx(builder(required, into), get(clone))]
    budget: TimeBudget,
}

impl RequestScope {
    /// Start a loader builder bound to this scope. The loader receives its
    /// own child slice of the request budget; finish it with the usual
    /// builder calls (`name`, `max_batch_size`, `batch_delay`, `build`).
    pub fn loader<F>(&self, fetcher: impl Into<Arc<F>>) -> LoaderBuilder<F>
    where
        F: BatchFetcher,
    {
        Loader::builder()
            .fetcher(fetcher)
            .budget(self.budget().child(stage::LOADER))
    }

    /// Child budget for any downstream caller that needs a bounded deadline
    /// of its own (data-fetch clients, auxiliary services).
    pub fn child(&self, stage: &str) -> TimeBudget {
        self.budget().child(stage)
    }
}
