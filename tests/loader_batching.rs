use rq_accel::prelude::*;
use rq_accel::testkit::StubFetcher;
use std::sync::Arc;
use std::time::Duration;

fn stub() -> Arc<StubFetcher> {
    Arc::new(StubFetcher::new([
        ("auth:1", "Ada"),
        ("auth:2", "Brian"),
        ("auth:3", "Grace"),
        ("auth:4", "Edsger"),
        ("auth:5", "Barbara"),
    ]))
}

fn loader_with(fetcher: &Arc<StubFetcher>, max_batch_size: usize, batch_delay: Duration) -> Arc<Loader<StubFetcher>> {
    Loader::<StubFetcher>::builder()
        .fetcher(Arc::clone(fetcher))
        .name("authors")
        .max_batch_size(max_batch_size)
        .batch_delay(batch_delay)
        .budget(TimeBudget::root(Duration::from_secs(60)))
        .build()
        .expect("loader built")
}

#[tokio::test(start_paused = true)]
async fn concurrent_loads_coalesce_into_one_fetch() {
    let fetcher = stub();
    let loader = loader_with(&fetcher, 32, Duration::from_millis(5));

    let (a, b, c) = tokio::join!(
        loader.load("auth:1".to_string()),
        loader.load("auth:2".to_string()),
        loader.load("auth:3".to_string()),
    );

    assert_eq!(a.unwrap(), Some("Ada".to_string()));
    assert_eq!(b.unwrap(), Some("Brian".to_string()));
    assert_eq!(c.unwrap(), Some("Grace".to_string()));

    assert_eq!(fetcher.batch_count(), 1);
    let mut keys = fetcher.batches().remove(0);
    keys.sort();
    assert_eq!(keys, vec!["auth:1", "auth:2", "auth:3"]);
}

#[tokio::test(start_paused = true)]
async fn same_key_is_fetched_once_and_shared() {
    let fetcher = stub();
    let loader = loader_with(&fetcher, 32, Duration::from_millis(5));

    let (a, b) = tokio::join!(loader.load("auth:1".to_string()), loader.load("auth:1".to_string()));

    assert_eq!(a.unwrap(), Some("Ada".to_string()));
    assert_eq!(b.unwrap(), Some("Ada".to_string()));
    assert_eq!(fetcher.batches(), vec![vec!["auth:1".to_string()]]);
}

#[tokio::test(start_paused = true)]
async fn resolved_outcomes_are_memoized_for_the_scope() {
    let fetcher = stub();
    let loader = loader_with(&fetcher, 32, Duration::from_millis(1));

    assert_eq!(loader.load("auth:2".to_string()).await.unwrap(), Some("Brian".to_string()));
    assert_eq!(loader.load("auth:2".to_string()).await.unwrap(), Some("Brian".to_string()));

    assert_eq!(fetcher.batch_count(), 1);
    assert_eq!(loader.stats().snapshot().memo_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn errors_are_memoized_like_values() {
    let fetcher = Arc::new(StubFetcher::new([("auth:1", "Ada")]).omitting("ghost"));
    let loader = loader_with(&fetcher, 32, Duration::from_millis(1));

    let first = loader.load("ghost".to_string()).await;
    assert!(matches!(first, Err(LoadError::MissingKey(ref k)) if k == "ghost"));

    let second = loader.load("ghost".to_string()).await;
    assert!(matches!(second, Err(LoadError::MissingKey(_))));

    // The violating key was fetched exactly once.
    assert_eq!(fetcher.batch_count(), 1);
    assert_eq!(loader.stats().snapshot().contract_violations, 1);
}

#[tokio::test(start_paused = true)]
async fn size_and_delay_triggers_split_five_loads_into_three_batches() {
    let fetcher = stub();
    let loader = loader_with(&fetcher, 2, Duration::from_millis(5));

    let (a, b, c, d, e) = tokio::join!(
        loader.load("auth:1".to_string()),
        loader.load("auth:2".to_string()),
        loader.load("auth:3".to_string()),
        loader.load("auth:4".to_string()),
        loader.load("auth:5".to_string()),
    );

    for outcome in [a, b, c, d, e] {
        assert!(outcome.unwrap().is_some());
    }

    assert_eq!(fetcher.batch_sizes(), vec![1, 2, 2]);
}

#[tokio::test(start_paused = true)]
async fn collection_continues_while_a_batch_is_in_flight() {
    let fetcher = Arc::new(
        StubFetcher::new([("auth:1", "Ada"), ("auth:2", "Brian"), ("auth:3", "Grace")])
            .with_delay(Duration::from_millis(50)),
    );
    let loader = loader_with(&fetcher, 2, Duration::from_millis(1));

    let started = tokio::time::Instant::now();
    let (a, b, c) = tokio::join!(
        loader.load("auth:1".to_string()),
        loader.load("auth:2".to_string()),
        loader.load("auth:3".to_string()),
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(fetcher.batch_count(), 2);

    // The second batch overlapped the first one's 50ms flight; a loader that
    // blocked collection until the flight returned would need ~100ms here.
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn missing_table_row_is_an_explicit_none() {
    let fetcher = stub();
    let loader = loader_with(&fetcher, 32, Duration::from_millis(1));

    assert_eq!(loader.load("auth:404".to_string()).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_reaches_every_waiter_in_the_batch() {
    let fetcher = Arc::new(StubFetcher::new([]).with_failure("backend down"));
    let loader = loader_with(&fetcher, 32, Duration::from_millis(1));

    let (a, b) = tokio::join!(loader.load("auth:1".to_string()), loader.load("auth:2".to_string()));

    for outcome in [a, b] {
        match outcome {
            Err(LoadError::Fetch(err)) => assert_eq!(err.0, "backend down"),
            other => panic!("expected fetch error, got {other:?}"),
        }
    }
    assert_eq!(fetcher.batch_count(), 1);
    assert_eq!(loader.stats().snapshot().fetch_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn omitted_key_fails_alone_without_poisoning_the_batch() {
    let fetcher = Arc::new(StubFetcher::new([("auth:1", "Ada")]).omitting("ghost"));
    let loader = loader_with(&fetcher, 32, Duration::from_millis(1));

    let (good, bad) = tokio::join!(loader.load("auth:1".to_string()), loader.load("ghost".to_string()));

    assert_eq!(good.unwrap(), Some("Ada".to_string()));
    assert!(matches!(bad, Err(LoadError::MissingKey(_))));
}

#[tokio::test(start_paused = true)]
async fn explicit_flush_dispatches_without_waiting_for_the_timer() {
    let fetcher = stub();
    // Delay long past the budget: only an explicit flush can resolve in time.
    let loader = Loader::<StubFetcher>::builder()
        .fetcher(Arc::clone(&fetcher))
        .batch_delay(Duration::from_secs(10))
        .budget(TimeBudget::root(Duration::from_secs(1)))
        .build()
        .expect("loader built");

    let (outcome, _) = tokio::join!(loader.load("auth:1".to_string()), async {
        tokio::task::yield_now().await;
        loader.flush();
    });

    assert_eq!(outcome.unwrap(), Some("Ada".to_string()));
    assert_eq!(fetcher.batch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn load_many_serves_memoized_keys_and_batches_the_rest() {
    let fetcher = stub();
    let loader = loader_with(&fetcher, 32, Duration::from_millis(1));

    assert_eq!(loader.load("auth:1".to_string()).await.unwrap(), Some("Ada".to_string()));

    let many = loader
        .load_many(vec!["auth:1".to_string(), "auth:2".to_string(), "auth:3".to_string()])
        .await
        .unwrap();

    assert_eq!(many["auth:1"], Some("Ada".to_string()));
    assert_eq!(many["auth:2"], Some("Brian".to_string()));
    assert_eq!(many["auth:3"], Some("Grace".to_string()));

    // auth:1 came out of the memo; the second fetch holds only the rest.
    assert_eq!(fetcher.batch_count(), 2);
    let mut second = fetcher.batches().remove(1);
    second.sort();
    assert_eq!(second, vec!["auth:2", "auth:3"]);
}

#[tokio::test(start_paused = true)]
async fn scope_built_loader_works_end_to_end() {
    let fetcher = stub();
    let scope = RequestScope::builder()
        .budget(TimeBudget::root(Duration::from_secs(60)))
        .build()
        .expect("scope built");

    let loader = scope
        .loader::<StubFetcher>(Arc::clone(&fetcher))
        .name("authors")
        .batch_delay(Duration::from_millis(1))
        .build()
        .expect("loader built");

    assert_eq!(loader.load("auth:1".to_string()).await.unwrap(), Some("Ada".to_string()));
    assert_eq!(loader.budget().label(), stage::LOADER);
}
