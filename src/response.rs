use crate::fingerprint::{CacheKey, FingerprintError};
use crate::invalidator::{InvalidationRules, Invalidator, UnknownCategoryPolicy};
use crate::stats::CacheStats;
use fieldx_plus::{child_build, fx_plus};
use moka::{future::Cache, policy::EvictionPolicy, Expiry};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

// What the moka layer stores: the computed response plus the lifetime it was
// stored with.
#[derive(Clone, Debug)]
pub(crate) struct StoredResponse<V> {
    pub(crate) value: V,
    pub(crate) ttl: Duration,
}

// Each entry expires on its own TTL, counted from insert and reset by
// overwrite. Reads leave the remaining lifetime untouched.
struct PerEntryTtl;

impl<V> Expiry<CacheKey, StoredResponse<V>> for PerEntryTtl
where
    V: Clone + Send + Sync + 'static,
{
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &StoredResponse<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &StoredResponse<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-wide cache of computed responses, keyed by
/// [`CacheKey`] fingerprints.
///
/// One instance is built at process start and handed (reference-counted) to
/// every request context; tenant isolation comes from the scope component of
/// the key, which is never optional. Entries live until their TTL runs out
/// (checked lazily, on access), until LRU eviction reclaims them at
/// capacity, or until an [`Invalidator`] removes them after a mutation.
///
/// ```ignore
/// let cache = ResponseCache::<serde_json::Value>::builder()
///     .name("responses")
///     .max_capacity(50_000)
///     .build()?;
///
/// let key = CacheKey::compute(tenant, "notes:list", query, &variables)?;
/// if let Some(hit) = cache.get(&key).await {
///     return Ok(hit);
/// }
/// let value = resolve(query).await?;
/// cache.set(key, value.clone(), Duration::from_secs(30)).await;
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    rc,
    builder(
        doc("Builder object of [`ResponseCache`].", "", "See [`ResponseCache::builder()`] method."),
        method_doc("Implement builder pattern for [`ResponseCache`]."),
    )
)]
pub struct ResponseCache<V>
where
    V: Debug + Clone + Send + Sync + 'static,
{
    /// Cache name. Most useful for debugging and logging.
    #[fieldx(lock, optional, clearer, get(off))]
    name: &'static str,

    /// Entry-count bound; crossing it evicts least-recently-used entries.
    #[fieldx(get(copy), default(10_000))]
    max_capacity: u64,

    #[fieldx(vis(pub(crate)), lazy, clearer(private), get(clone), builder(off))]
    cache: Arc<Cache<CacheKey, StoredResponse<V>>>,

    #[fieldx(lazy, get(clone), builder(off))]
    stats: Arc<CacheStats>,
}

impl<V> ResponseCache<V>
where
    V: Debug + Clone + Send + Sync + 'static,
{
    fn build_cache(&self) -> Arc<Cache<CacheKey, StoredResponse<V>>> {
        Arc::new(
            Cache::builder()
                .max_capacity(self.max_capacity())
                .name(self.clear_name().unwrap_or_else(|| std::any::type_name::<V>()))
                .eviction_policy(EvictionPolicy::lru())
                .expire_after(PerEntryTtl)
                .build(),
        )
    }

    fn build_stats(&self) -> Arc<CacheStats> {
        Arc::new(CacheStats::default())
    }

    #[inline]
    pub fn name(&self) -> String {
        self.cache().name().unwrap_or("<anon>").to_string()
    }

    /// Look up a previously computed response. Returns `None` on miss and on
    /// expiry; a hit refreshes the entry's recency. Never returns an entry
    /// from a different tenant scope — the scope is part of key equality.
    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        match self.cache().get(key).await {
            Some(stored) => {
                self.stats().record_hit();
                tracing::debug!("[{}] HIT({key})", self.name());
                Some(stored.value)
            }
            None => {
                self.stats().record_miss();
                tracing::debug!("[{}] MISS({key})", self.name());
                None
            }
        }
    }

    /// Insert or overwrite a computed response with its lifetime. At
    /// capacity the least-recently-used entry makes room.
    pub async fn set(&self, key: CacheKey, value: V, ttl: Duration) {
        tracing::debug!("[{}] SET({key}, ttl={ttl:?})", self.name());
        self.stats().record_insertion();
        self.cache().insert(key, StoredResponse { value, ttl }).await;
    }

    /// [`get()`](Self::get) for a fingerprint that may have failed to build.
    /// The failure is logged and counted, then treated as a plain miss — a
    /// broken fingerprint must cost a recomputation, not the request.
    pub async fn lookup(&self, key: &Result<CacheKey, FingerprintError>) -> Option<V> {
        match key {
            Ok(key) => self.get(key).await,
            Err(err) => {
                self.stats().record_anomaly();
                tracing::warn!("[{}] fingerprint failure treated as miss: {err}", self.name());
                None
            }
        }
    }

    /// [`set()`](Self::set) for a fingerprint that may have failed to build;
    /// nothing is stored in that case.
    pub async fn store(&self, key: Result<CacheKey, FingerprintError>, value: V, ttl: Duration) {
        match key {
            Ok(key) => self.set(key, value, ttl).await,
            Err(err) => {
                self.stats().record_anomaly();
                tracing::warn!("[{}] fingerprint failure, response not cached: {err}", self.name());
            }
        }
    }

    /// Drop every entry of one tenant scope.
    pub async fn purge_scope(&self, scope: &str) {
        self.run_maintenance().await;
        let keys = self.matching_keys(|key| key.scope() == scope);
        let count = keys.len() as u64;
        for key in &keys {
            self.remove(key).await;
        }
        self.stats().record_invalidation(count);
        tracing::debug!("[{}] purged {count} entries of scope '{scope}'", self.name());
    }

    /// Drop everything. The conservative invalidation path, also useful as
    /// an operator control.
    pub async fn purge_all(&self) {
        self.cache().invalidate_all();
        self.stats().record_purge();
        tracing::debug!("[{}] purged all entries", self.name());
    }

    /// Push lazy housekeeping (expired entries, pending evictions) through.
    /// Expiry stays correct without it; call it under memory pressure or
    /// when entry counts must be exact.
    pub async fn run_maintenance(&self) {
        self.cache().run_pending_tasks().await;
    }

    /// Approximate number of live entries; exact right after
    /// [`run_maintenance()`](Self::run_maintenance).
    pub fn entry_count(&self) -> u64 {
        self.cache().entry_count()
    }

    /// Build the invalidator bound to this cache. Process-wide, like the
    /// cache itself; the mutation-handling layer calls it post-commit.
    pub fn invalidator(&self, rules: InvalidationRules, fallback: UnknownCategoryPolicy) -> Arc<Invalidator<V>> {
        child_build!(
            self,
            Invalidator<V> {
                rules: rules,
                fallback: fallback,
            }
        )
        .unwrap()
    }

    pub(crate) fn matching_keys(&self, pred: impl Fn(&CacheKey) -> bool) -> Vec<CacheKey> {
        self.cache()
            .iter()
            .filter(|(key, _)| pred(key))
            .map(|(key, _)| (*key).clone())
            .collect()
    }

    pub(crate) async fn remove(&self, key: &CacheKey) {
        self.cache().invalidate(key).await;
    }
}
