use rq_accel::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

async fn seeded_cache() -> (Arc<ResponseCache<String>>, CacheKey, CacheKey) {
    let cache = ResponseCache::builder().name("responses").build().expect("cache built");

    let notes = CacheKey::compute("tenantA", "notes:list:userA", "{ notes }", &json!({})).unwrap();
    let profile = CacheKey::compute("tenantA", "users:profile:userA", "{ user }", &json!({})).unwrap();

    cache.set(notes.clone(), "note list".to_string(), TTL).await;
    cache.set(profile.clone(), "profile".to_string(), TTL).await;

    (cache, notes, profile)
}

#[tokio::test]
async fn mutation_rule_prunes_only_matching_entries() {
    let (cache, notes, profile) = seeded_cache().await;
    let invalidator = cache.invalidator(
        InvalidationRules::new().on_rule("createNote", "notes:*"),
        UnknownCategoryPolicy::PurgeAll,
    );

    invalidator.invalidate("createNote", &["userA".to_string()]).await;

    assert_eq!(cache.get(&notes).await, None);
    assert_eq!(cache.get(&profile).await, Some("profile".to_string()));
}

#[tokio::test]
async fn invalidation_is_idempotent() {
    let (cache, notes, profile) = seeded_cache().await;
    let invalidator = cache.invalidator(
        InvalidationRules::new().on_rule("createNote", "notes:*"),
        UnknownCategoryPolicy::PurgeAll,
    );

    invalidator.invalidate("createNote", &["userA".to_string()]).await;
    invalidator.invalidate("createNote", &["userA".to_string()]).await;

    assert_eq!(cache.get(&notes).await, None);
    assert_eq!(cache.get(&profile).await, Some("profile".to_string()));
}

#[tokio::test]
async fn unknown_category_purges_everything_by_default() {
    let (cache, notes, profile) = seeded_cache().await;
    let invalidator = cache.invalidator(
        InvalidationRules::new().on_rule("createNote", "notes:*"),
        UnknownCategoryPolicy::PurgeAll,
    );

    invalidator.invalidate("renameWorkspace", &[]).await;

    assert_eq!(cache.get(&notes).await, None);
    assert_eq!(cache.get(&profile).await, None);
    assert_eq!(cache.stats().snapshot().purges, 1);
}

#[tokio::test]
async fn unknown_category_can_be_told_to_ignore() {
    let (cache, notes, profile) = seeded_cache().await;
    let invalidator = cache.invalidator(
        InvalidationRules::new().on_rule("createNote", "notes:*"),
        UnknownCategoryPolicy::Ignore,
    );

    invalidator.invalidate("renameWorkspace", &[]).await;

    assert_eq!(cache.get(&notes).await, Some("note list".to_string()));
    assert_eq!(cache.get(&profile).await, Some("profile".to_string()));
}

#[tokio::test]
async fn predicate_rules_see_the_affected_identifiers() {
    let (cache, notes_a, profile_a) = seeded_cache().await;
    let notes_b = CacheKey::compute("tenantA", "notes:list:userB", "{ notes }", &json!({})).unwrap();
    cache.set(notes_b.clone(), "other list".to_string(), TTL).await;

    let invalidator = cache.invalidator(
        InvalidationRules::new().on(
            "deleteUser",
            InvalidationPattern::Predicate(Arc::new(|key, ids| {
                ids.iter().any(|id| key.surface().ends_with(id.as_str()))
            })),
        ),
        UnknownCategoryPolicy::PurgeAll,
    );

    invalidator.invalidate("deleteUser", &["userA".to_string()]).await;

    assert_eq!(cache.get(&notes_a).await, None);
    assert_eq!(cache.get(&profile_a).await, None);
    assert_eq!(cache.get(&notes_b).await, Some("other list".to_string()));
}

#[tokio::test]
async fn a_category_may_carry_several_patterns() {
    let (cache, notes, profile) = seeded_cache().await;
    let invalidator = cache.invalidator(
        InvalidationRules::new()
            .on_rule("deleteUser", "notes:*")
            .on_rule("deleteUser", "users:*"),
        UnknownCategoryPolicy::PurgeAll,
    );

    invalidator.invalidate("deleteUser", &["userA".to_string()]).await;

    assert_eq!(cache.get(&notes).await, None);
    assert_eq!(cache.get(&profile).await, None);
}

#[tokio::test]
async fn purge_scope_leaves_other_tenants_alone() {
    let (cache, notes_a, _) = seeded_cache().await;
    let notes_b = CacheKey::compute("tenantB", "notes:list:userZ", "{ notes }", &json!({})).unwrap();
    cache.set(notes_b.clone(), "tenant B list".to_string(), TTL).await;

    cache.purge_scope("tenantA").await;

    assert_eq!(cache.get(&notes_a).await, None);
    assert_eq!(cache.get(&notes_b).await, Some("tenant B list".to_string()));
}
