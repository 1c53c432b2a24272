use crate::budget::{stage, TimeBudget};
use crate::stats::LoaderStats;
use crate::traits::BatchFetcher;
use crate::types::{Fetched, LoadError, LoadOutcome};
use fieldx_plus::fx_plus;
use std::collections::{hash_map, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout_at;

// One not-yet-resolved key. Every load() call for the key parks a waiter
// here; all of them are woken with clones of the same outcome.
struct PendingRequest<F>
where
    F: BatchFetcher,
{
    waiters: Vec<oneshot::Sender<LoadOutcome<F>>>,
}

// The loader's guarded collection buffer. Mutated only in short synchronous
// sections; the generation counter ties each delay timer to the batch it was
// started for, so a timer left over from an already dispatched batch never
// fires into the next one.
struct CollectState<F>
where
    F: BatchFetcher,
{
    pending: HashMap<F::Key, PendingRequest<F>>,
    collecting: Vec<F::Key>,
    generation: u64,
    memo: HashMap<F::Key, LoadOutcome<F>>,
}

impl<F> CollectState<F>
where
    F: BatchFetcher,
{
    fn new() -> Self {
        Self {
            pending: HashMap::new(),
            collecting: Vec::new(),
            generation: 0,
            memo: HashMap::new(),
        }
    }

    fn take_collecting(&mut self) -> Vec<F::Key> {
        self.generation += 1;
        std::mem::take(&mut self.collecting)
    }
}

enum Enqueued<F>
where
    F: BatchFetcher,
{
    Memoized(LoadOutcome<F>),
    Waiting(oneshot::Receiver<LoadOutcome<F>>),
}

/// Request-scoped batching loader.
///
/// Coalesces concurrent point lookups into batched fetches: calls arriving
/// within one collecting window are dispatched as a single
/// [`BatchFetcher::fetch`] round trip, and repeated requests for one key
/// share a single pending result. Resolved outcomes (values, explicit
/// misses, and errors alike) are memoized for the lifetime of the loader,
/// which is exactly one request — build loaders through
/// [`RequestScope`](crate::scope::RequestScope) and drop them with it, never
/// share one across requests.
///
/// A batch is dispatched by whichever comes first: the collecting batch
/// reaching `max_batch_size`, `batch_delay` elapsing since its first key, or
/// an explicit [`flush()`](Self::flush). Dispatch does not block collection;
/// the next batch starts filling while earlier ones are still in flight.
///
/// ```ignore
/// let scope = RequestScope::builder()
///     .budget(TimeBudget::root(Duration::from_secs(1)))
///     .build()?;
/// let authors = scope.loader(AuthorFetcher::new(pool)).build()?;
///
/// let author = authors.load("auth:42".to_string()).await?;
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    rc,
    builder(
        doc("Builder object of [`Loader`].", "", "See [`Loader::builder()`] method."),
        method_doc("Implement builder pattern for [`Loader`]."),
    )
)]
pub struct Loader<F>
where
    F: BatchFetcher,
    F::Key: Send + Sync + 'static,
    F::Error: Send + Sync + 'static,
{
    #[fieldx(vis(pub(crate)), builder(vis(pub), required, into), get(clone))]
    fetcher: Arc<F>,

    /// Loader name. Most useful for debugging and logging.
    #[fieldx(get(clone), builder(into), default(String::from("loader")))]
    name: String,

    /// Size trigger: a collecting batch is dispatched as soon as it holds
    /// this many keys.
    #[fieldx(get(copy), default(32))]
    max_batch_size: usize,

    /// Time trigger: how long the collecting batch waits for more keys after
    /// the first one arrives.
    #[fieldx(get(copy), default(Duration::from_millis(2)))]
    batch_delay: Duration,

    /// The loader's slice of the request deadline. Checked before every
    /// enqueue and bounding every dispatched fetch.
    #[fieldx(builder(required, into), get(clone))]
    budget: TimeBudget,

    #[fieldx(private, lazy, clearer, lock, get, get_mut, builder(off))]
    state: CollectState<F>,

    #[fieldx(lazy, get(clone), builder(off))]
    stats: Arc<LoaderStats>,
}

impl<F> Loader<F>
where
    F: BatchFetcher,
{
    fn build_state(&self) -> CollectState<F> {
        CollectState::new()
    }

    fn build_stats(&self) -> Arc<LoaderStats> {
        Arc::new(LoaderStats::default())
    }

    /// Point lookup of a single key.
    ///
    /// Suspends until the key's batch is dispatched and resolved, or until
    /// the loader budget runs out, whichever is first. `Ok(None)` is an
    /// explicit backend miss.
    pub async fn load(&self, key: F::Key) -> LoadOutcome<F> {
        let rx = match self.enqueue(key) {
            Enqueued::Memoized(outcome) => return outcome,
            Enqueued::Waiting(rx) => rx,
        };
        self.await_outcome(rx).await
    }

    /// Batched lookup of several keys at once.
    ///
    /// Every key is enqueued before the first one is awaited, so the whole
    /// set lands in as few batches as the triggers allow. Memoized outcomes
    /// are served without touching the fetcher. The first failed key fails
    /// the call (fail-closed); explicit misses are `None` values in the
    /// reply map.
    pub async fn load_many(
        &self,
        keys: Vec<F::Key>,
    ) -> Result<HashMap<F::Key, Option<F::Value>>, LoadError<F::Error>> {
        let mut resolved = HashMap::new();
        let mut waiting = Vec::with_capacity(keys.len());

        for key in keys {
            match self.enqueue(key.clone()) {
                Enqueued::Memoized(Ok(value)) => {
                    resolved.insert(key, value);
                }
                Enqueued::Memoized(Err(err)) => return Err(err),
                Enqueued::Waiting(rx) => waiting.push((key, rx)),
            }
        }

        for (key, rx) in waiting {
            let value = self.await_outcome(rx).await?;
            resolved.insert(key, value);
        }

        Ok(resolved)
    }

    /// Dispatch whatever is currently collecting without waiting for the
    /// delay timer. Meant for the end of a resolution tick, when no further
    /// keys can arrive and holding the batch back only adds latency.
    pub fn flush(&self) {
        let batch = {
            let mut state = self.state_mut();
            if state.collecting.is_empty() {
                None
            }
            else {
                Some(state.take_collecting())
            }
        };
        if let Some(keys) = batch {
            tracing::debug!("[{}] explicit flush of {} key(s)", self.name(), keys.len());
            self.spawn_dispatch(keys);
        }
    }

    // Registers the key and decides, under the state lock, whether this call
    // must also start a delay timer or dispatch a full batch. The spawns
    // themselves happen after the lock is released.
    fn enqueue(&self, key: F::Key) -> Enqueued<F> {
        self.stats().record_load();

        if self.budget().is_expired() {
            self.stats().record_timeout();
            return Enqueued::Memoized(Err(LoadError::TimedOut(self.budget().label().to_string())));
        }

        let mut dispatch: Option<Vec<F::Key>> = None;
        let mut timer_generation: Option<u64> = None;

        let result = {
            let mut state = self.state_mut();

            if let Some(outcome) = state.memo.get(&key) {
                self.stats().record_memo_hit();
                Enqueued::Memoized(outcome.clone())
            }
            else {
                let (tx, rx) = oneshot::channel();
                match state.pending.entry(key.clone()) {
                    hash_map::Entry::Occupied(mut entry) => {
                        // Already collecting or in flight; attach, don't refetch.
                        entry.get_mut().waiters.push(tx);
                    }
                    hash_map::Entry::Vacant(entry) => {
                        entry.insert(PendingRequest { waiters: vec![tx] });
                        if state.collecting.is_empty() {
                            timer_generation = Some(state.generation);
                        }
                        state.collecting.push(key);
                        if state.collecting.len() >= self.max_batch_size() {
                            dispatch = Some(state.take_collecting());
                        }
                    }
                }
                Enqueued::Waiting(rx)
            }
        };

        if let Some(keys) = dispatch {
            self.spawn_dispatch(keys);
        }
        else if let Some(generation) = timer_generation {
            self.spawn_timer(generation);
        }

        result
    }

    async fn await_outcome(&self, rx: oneshot::Receiver<LoadOutcome<F>>) -> LoadOutcome<F> {
        match timeout_at(self.budget().deadline(), rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(LoadError::Canceled),
            Err(_) => {
                // Never block past the deadline; whatever the batch delivers
                // later is discarded with the dropped receiver.
                self.stats().record_timeout();
                Err(LoadError::TimedOut(self.budget().label().to_string()))
            }
        }
    }

    fn spawn_timer(&self, generation: u64) {
        let myself = self.myself().unwrap();
        let delay = self.batch_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            myself.flush_generation(generation);
        });
    }

    fn flush_generation(&self, generation: u64) {
        let batch = {
            let mut state = self.state_mut();
            if state.generation != generation || state.collecting.is_empty() {
                None
            }
            else {
                Some(state.take_collecting())
            }
        };
        if let Some(keys) = batch {
            self.spawn_dispatch(keys);
        }
    }

    fn spawn_dispatch(&self, keys: Vec<F::Key>) {
        let myself = self.myself().unwrap();
        tokio::spawn(async move {
            myself.dispatch(keys).await;
        });
    }

    // One fetcher round trip for one batch. Runs as its own task so the
    // next batch can collect and dispatch while this one is in flight.
    async fn dispatch(&self, keys: Vec<F::Key>) {
        self.stats().record_batch(keys.len());
        tracing::debug!("[{}] dispatching batch of {}", self.name(), keys.len());

        let budget = self.budget().child(stage::FETCH);
        if budget.ensure().is_err() {
            self.stats().record_timeout();
            self.resolve_batch(&keys, Err(LoadError::TimedOut(budget.label().to_string())));
            return;
        }

        let fetcher = self.fetcher();
        match timeout_at(budget.deadline(), fetcher.fetch(keys.clone(), &budget)).await {
            Err(_) => {
                // The transport call may still be running somewhere; its
                // result no longer matters to anyone.
                self.stats().record_timeout();
                tracing::debug!("[{}] batch of {} abandoned on expired budget", self.name(), keys.len());
                self.resolve_batch(&keys, Err(LoadError::TimedOut(budget.label().to_string())));
            }
            Ok(Err(err)) => {
                self.stats().record_fetch_error();
                tracing::debug!("[{}] batch fetch failed: {}", self.name(), err);
                self.resolve_batch(&keys, Err(LoadError::Fetch(Arc::new(err))));
            }
            Ok(Ok(mut reply)) => {
                for key in keys {
                    let outcome = match reply.remove(&key) {
                        Some(Fetched::Hit(value)) => Ok(Some(value)),
                        Some(Fetched::Missing) => Ok(None),
                        None => {
                            self.stats().record_contract_violation();
                            tracing::warn!("[{}] fetcher reply omitted key '{key}'", self.name());
                            Err(LoadError::MissingKey(key.to_string()))
                        }
                    };
                    self.resolve(key, outcome);
                }
            }
        }
    }

    fn resolve_batch(&self, keys: &[F::Key], outcome: LoadOutcome<F>) {
        for key in keys {
            self.resolve(key.clone(), outcome.clone());
        }
    }

    // Memoizes the outcome and wakes every waiter parked on the key.
    fn resolve(&self, key: F::Key, outcome: LoadOutcome<F>) {
        let waiters = {
            let mut state = self.state_mut();
            state.memo.insert(key.clone(), outcome.clone());
            state
                .pending
                .remove(&key)
                .map(|pending| pending.waiters)
                .unwrap_or_default()
        };
        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
    }
}
