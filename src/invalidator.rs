use crate::fingerprint::CacheKey;
use crate::response::ResponseCache;
use fieldx_plus::{fx_plus, Child};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// One rule for matching cache entries against a committed mutation. Exact
/// and prefix rules match the key's surface label; predicate rules also see
/// the mutation's affected identifiers.
#[derive(Clone)]
pub enum InvalidationPattern {
    Exact(String),
    Prefix(String),
    Predicate(Arc<dyn Fn(&CacheKey, &[String]) -> bool + Send + Sync>),
}

impl InvalidationPattern {
    /// Parse the rule-table notation: a trailing `*` makes a prefix rule
    /// (`notes:*` matches every surface starting with `notes:`), anything
    /// else is an exact match.
    pub fn parse(rule: &str) -> Self {
        match rule.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(rule.to_string()),
        }
    }

    fn matches(&self, key: &CacheKey, affected_ids: &[String]) -> bool {
        match self {
            Self::Exact(surface) => key.surface() == surface,
            Self::Prefix(prefix) => key.surface().starts_with(prefix.as_str()),
            Self::Predicate(pred) => pred(key, affected_ids),
        }
    }
}

impl Debug for InvalidationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(s) => f.debug_tuple("Exact").field(s).finish(),
            Self::Prefix(s) => f.debug_tuple("Prefix").field(s).finish(),
            Self::Predicate(_) => f.debug_tuple("Predicate").field(&"<closure>").finish(),
        }
    }
}

/// Mutation category → patterns table, built once at service wiring time.
#[derive(Clone, Debug, Default)]
pub struct InvalidationRules {
    by_category: HashMap<String, Vec<InvalidationPattern>>,
}

impl InvalidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern for a mutation category. Chainable; a category may
    /// carry any number of patterns.
    pub fn on(mut self, category: impl Into<String>, pattern: InvalidationPattern) -> Self {
        self.by_category.entry(category.into()).or_default().push(pattern);
        self
    }

    /// Shorthand for [`on()`](Self::on) with rule-table notation.
    pub fn on_rule(self, category: impl Into<String>, rule: &str) -> Self {
        self.on(category, InvalidationPattern::parse(rule))
    }

    fn patterns(&self, category: &str) -> Option<&[InvalidationPattern]> {
        self.by_category.get(category).map(Vec::as_slice)
    }
}

/// What to do with a mutation category no rule covers. Correctness says
/// drop everything that might be stale; the cost of that default is real,
/// so it stays an explicit, overridable choice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownCategoryPolicy {
    /// Drop the entire cache. Safe but costly.
    #[default]
    PurgeAll,
    /// Leave the cache untouched.
    Ignore,
}

/// Consumes mutation notifications and prunes the
/// [`ResponseCache`](crate::response::ResponseCache) it was built from.
///
/// Built via [`ResponseCache::invalidator()`](crate::response::ResponseCache::invalidator);
/// shares the cache's lifetime and is safe to call from any number of
/// mutation handlers concurrently.
#[fx_plus(child(ResponseCache<V>, rc_strong), sync, rc, get(off), default(off))]
pub struct Invalidator<V>
where
    V: Debug + Clone + Send + Sync + 'static,
{
    #[fieldx(get)]
    rules: InvalidationRules,

    #[fieldx(get(copy))]
    fallback: UnknownCategoryPolicy,
}

impl<V> Invalidator<V>
where
    V: Debug + Clone + Send + Sync + 'static,
{
    /// Apply the rules registered for `category`, removing every matching
    /// entry. Must be called after the mutation commits, never before —
    /// invalidating first would let a racing reader re-cache the pre-commit
    /// state. Idempotent: re-running the same notification on an already
    /// clean cache changes nothing.
    pub async fn invalidate(&self, category: &str, affected_ids: &[String]) {
        let cache = self.parent();
        let rules = self.rules();

        match rules.patterns(category) {
            Some(patterns) => {
                cache.run_maintenance().await;
                let keys =
                    cache.matching_keys(|key| patterns.iter().any(|pattern| pattern.matches(key, affected_ids)));
                let count = keys.len() as u64;
                for key in &keys {
                    cache.remove(key).await;
                }
                cache.stats().record_invalidation(count);
                tracing::debug!("[{}] invalidate({category}) removed {count} entries", cache.name());
            }
            None => match self.fallback() {
                UnknownCategoryPolicy::PurgeAll => {
                    tracing::warn!(
                        "[{}] unrecognized mutation category '{category}', purging cache",
                        cache.name()
                    );
                    cache.purge_all().await;
                }
                UnknownCategoryPolicy::Ignore => {
                    tracing::warn!(
                        "[{}] unrecognized mutation category '{category}' ignored",
                        cache.name()
                    );
                }
            },
        }
    }
}
