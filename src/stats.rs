use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bounds of the batch size distribution buckets; sizes above the last
/// bound land in the overflow bucket.
pub const BATCH_SIZE_BOUNDS: [usize; 6] = [1, 2, 4, 8, 16, 32];

const BUCKET_COUNT: usize = BATCH_SIZE_BOUNDS.len() + 1;

/// Counters kept by every [`Loader`](crate::loader::Loader). Read-only for
/// the surrounding metrics layer; export format and transport are its
/// concern, not ours.
#[derive(Debug, Default)]
pub struct LoaderStats {
    loads: AtomicU64,
    memo_hits: AtomicU64,
    batches: AtomicU64,
    keys_fetched: AtomicU64,
    timeouts: AtomicU64,
    fetch_errors: AtomicU64,
    contract_violations: AtomicU64,
    size_buckets: [AtomicU64; BUCKET_COUNT],
}

impl LoaderStats {
    pub(crate) fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_memo_hit(&self) {
        self.memo_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self, size: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.keys_fetched.fetch_add(size as u64, Ordering::Relaxed);
        let idx = BATCH_SIZE_BOUNDS
            .iter()
            .position(|bound| size <= *bound)
            .unwrap_or(BUCKET_COUNT - 1);
        self.size_buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_contract_violation(&self) {
        self.contract_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoaderStatsSnapshot {
        let batches = self.batches.load(Ordering::Relaxed);
        let keys_fetched = self.keys_fetched.load(Ordering::Relaxed);
        let mut size_buckets = [0u64; BUCKET_COUNT];
        for (slot, bucket) in size_buckets.iter_mut().zip(self.size_buckets.iter()) {
            *slot = bucket.load(Ordering::Relaxed);
        }

        LoaderStatsSnapshot {
            loads: self.loads.load(Ordering::Relaxed),
            memo_hits: self.memo_hits.load(Ordering::Relaxed),
            batches,
            keys_fetched,
            timeouts: self.timeouts.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            contract_violations: self.contract_violations.load(Ordering::Relaxed),
            size_buckets,
            avg_batch_size: if batches > 0 {
                keys_fetched as f64 / batches as f64
            }
            else {
                0.0
            },
        }
    }
}

/// Point-in-time copy of [`LoaderStats`].
#[derive(Clone, Debug, PartialEq)]
pub struct LoaderStatsSnapshot {
    pub loads: u64,
    pub memo_hits: u64,
    pub batches: u64,
    pub keys_fetched: u64,
    pub timeouts: u64,
    pub fetch_errors: u64,
    pub contract_violations: u64,
    /// Batch count per size bucket; bounds in [`BATCH_SIZE_BOUNDS`], last
    /// slot is the overflow bucket.
    pub size_buckets: [u64; BUCKET_COUNT],
    pub avg_batch_size: f64,
}

/// Counters kept by the [`ResponseCache`](crate::response::ResponseCache).
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    invalidations: AtomicU64,
    purges: AtomicU64,
    anomalies: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidation(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_purge(&self) {
        self.purges.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        CacheStatsSnapshot {
            hits,
            misses,
            insertions: self.insertions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            hit_rate: if hits + misses > 0 {
                hits as f64 / (hits + misses) as f64
            }
            else {
                0.0
            },
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Clone, Debug, PartialEq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub invalidations: u64,
    pub purges: u64,
    pub anomalies: u64,
    pub hit_rate: f64,
}
