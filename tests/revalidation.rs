mod common;

use std::time::Duration;

use futures::future::join_all;

use alphafeed::cache::{CacheConfig, CacheKey, CacheStore, Revalidation};
use alphafeed::domain::trending::{SortField, SortOrder, TimeWindow, TrendingQuery};

use common::{Harness, StubMarket, seed};

fn always_stale() -> CacheConfig {
    CacheConfig {
        soft_ttl: Duration::ZERO,
        ..CacheConfig::default()
    }
}

fn by_count() -> TrendingQuery {
    TrendingQuery {
        window: TimeWindow::days(1),
        limit: 10,
        sort_field: SortField::MentionCount,
        sort_order: SortOrder::Desc,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stale_reads_trigger_one_recompute() {
    let harness = Harness::new(always_stale(), StubMarket::default());
    seed(harness.repo.as_ref(), "ABC", "eth", Some("0xAAA"), 3, 5).await;

    let warm = harness.service.rank(by_count()).await;
    assert_eq!(harness.repo.aggregate_calls(), 1);

    harness.repo.set_delay(Duration::from_millis(200));
    let reads = (0..16).map(|_| harness.service.rank(by_count()));
    let served = join_all(reads).await;

    assert!(served.iter().all(|items| *items == warm));
    harness.settle().await;
    assert_eq!(harness.repo.aggregate_calls(), 2);
}

#[tokio::test]
async fn stale_entry_is_served_then_replaced() {
    let harness = Harness::new(always_stale(), StubMarket::default());
    seed(harness.repo.as_ref(), "ABC", "eth", Some("0xAAA"), 3, 5).await;

    let before = harness.service.rank(by_count()).await;
    seed(harness.repo.as_ref(), "XYZ", "eth", Some("0xBBB"), 1, 5).await;

    let stale = harness.service.rank(by_count()).await;
    assert_eq!(stale, before);

    harness.settle().await;
    let key = CacheKey::trending(&by_count());
    let entry = harness
        .store
        .get(key.as_str())
        .await
        .expect("cache read")
        .expect("entry present");
    let refreshed = alphafeed::cache::decode_items(&entry.payload).expect("decode");
    assert_eq!(refreshed.len(), 2);
    assert!(
        harness
            .store
            .get(&key.lock_key())
            .await
            .expect("cache read")
            .is_none(),
        "lock released after refresh"
    );
}

#[tokio::test]
async fn failed_recompute_keeps_previous_entry() {
    let harness = Harness::new(always_stale(), StubMarket::default());
    seed(harness.repo.as_ref(), "ABC", "eth", Some("0xAAA"), 3, 5).await;

    let before = harness.service.rank(by_count()).await;
    assert_eq!(before.len(), 1);

    harness.repo.set_failing(true);
    let served = harness.service.rank(by_count()).await;
    assert_eq!(served, before);
    harness.settle().await;
    assert_eq!(harness.repo.aggregate_calls(), 2);

    let key = CacheKey::trending(&by_count());
    let entry = harness
        .store
        .get(key.as_str())
        .await
        .expect("cache read")
        .expect("entry kept");
    assert_eq!(
        alphafeed::cache::decode_items(&entry.payload).expect("decode"),
        before
    );
    assert_eq!(harness.service.rank(by_count()).await, before);
}

#[tokio::test]
async fn held_lock_skips_recompute() {
    let harness = Harness::new(always_stale(), StubMarket::default());
    seed(harness.repo.as_ref(), "ABC", "eth", Some("0xAAA"), 3, 5).await;
    harness.service.rank(by_count()).await;

    let key = CacheKey::trending(&by_count());
    let taken = harness
        .store
        .set_if_absent(&key.lock_key(), "other-worker".into(), Duration::from_secs(30))
        .await
        .expect("take lock");
    assert!(taken);

    assert_eq!(
        harness.coordinator.revalidate(key.clone(), by_count()),
        Revalidation::Spawned
    );
    harness.settle().await;

    assert_eq!(harness.repo.aggregate_calls(), 1);
    let lock = harness
        .store
        .get(&key.lock_key())
        .await
        .expect("cache read")
        .expect("foreign lock untouched");
    assert_eq!(lock.payload, "other-worker");
}

#[tokio::test]
async fn duplicate_requests_are_not_spawned_twice() {
    let harness = Harness::new(always_stale(), StubMarket::default());
    seed(harness.repo.as_ref(), "ABC", "eth", Some("0xAAA"), 1, 5).await;
    harness.repo.set_delay(Duration::from_millis(200));

    let key = CacheKey::trending(&by_count());
    assert_eq!(
        harness.coordinator.revalidate(key.clone(), by_count()),
        Revalidation::Spawned
    );
    assert_eq!(
        harness.coordinator.revalidate(key.clone(), by_count()),
        Revalidation::AlreadyRunning
    );
    assert!(harness.coordinator.is_in_flight(&key));

    harness.settle().await;
    assert!(!harness.coordinator.is_in_flight(&key));
    assert_eq!(harness.repo.aggregate_calls(), 1);
}

#[tokio::test]
async fn shutdown_cancels_in_flight_work_and_refuses_more() {
    let harness = Harness::new(always_stale(), StubMarket::default());
    seed(harness.repo.as_ref(), "ABC", "eth", Some("0xAAA"), 1, 5).await;
    harness.repo.set_delay(Duration::from_secs(30));

    let key = CacheKey::trending(&by_count());
    assert_eq!(
        harness.coordinator.revalidate(key.clone(), by_count()),
        Revalidation::Spawned
    );
    // Let the task take its lock and block inside the store.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        harness
            .store
            .get(&key.lock_key())
            .await
            .expect("cache read")
            .is_some()
    );

    let cancelled = harness.coordinator.shutdown(Duration::from_secs(1)).await;
    assert_eq!(cancelled, 1);
    assert_eq!(harness.coordinator.in_flight(), 0);
    assert!(
        harness
            .store
            .get(&key.lock_key())
            .await
            .expect("cache read")
            .is_none()
    );

    assert_eq!(
        harness.coordinator.revalidate(key, by_count()),
        Revalidation::ShuttingDown
    );
    assert_eq!(harness.coordinator.in_flight(), 0);
}

#[tokio::test]
async fn lock_errors_skip_recompute() {
    let harness = Harness::new(always_stale(), StubMarket::default());
    seed(harness.repo.as_ref(), "ABC", "eth", Some("0xAAA"), 3, 5).await;
    let warm = harness.service.rank(by_count()).await;

    harness.faults.fail_locks(true);
    assert_eq!(harness.service.rank(by_count()).await, warm);
    harness.settle().await;

    assert_eq!(harness.repo.aggregate_calls(), 1);
    let key = CacheKey::trending(&by_count());
    assert!(
        harness
            .store
            .get(&key.lock_key())
            .await
            .expect("cache read")
            .is_none()
    );
}

#[tokio::test]
async fn shutdown_leaves_locks_of_other_workers() {
    let harness = Harness::new(always_stale(), StubMarket::default());
    seed(harness.repo.as_ref(), "ABC", "eth", Some("0xAAA"), 1, 5).await;

    let key = CacheKey::trending(&by_count());
    assert!(
        harness
            .store
            .set_if_absent(&key.lock_key(), "other-process".into(), Duration::from_secs(30))
            .await
            .expect("take lock")
    );

    assert_eq!(
        harness.coordinator.revalidate(key.clone(), by_count()),
        Revalidation::Spawned
    );
    let cancelled = harness.coordinator.shutdown(Duration::from_secs(1)).await;
    assert_eq!(cancelled, 1);

    let lock = harness
        .store
        .get(&key.lock_key())
        .await
        .expect("cache read")
        .expect("foreign lock kept");
    assert_eq!(lock.payload, "other-process");
    assert_eq!(harness.repo.aggregate_calls(), 0);
}

#[tokio::test]
async fn overlong_refresh_does_not_release_a_successor_lock() {
    let harness = Harness::new(
        CacheConfig {
            lock_ttl: Duration::from_millis(50),
            ..always_stale()
        },
        StubMarket::default(),
    );
    seed(harness.repo.as_ref(), "ABC", "eth", Some("0xAAA"), 1, 5).await;
    harness.repo.set_delay(Duration::from_millis(300));

    let key = CacheKey::trending(&by_count());
    assert_eq!(
        harness.coordinator.revalidate(key.clone(), by_count()),
        Revalidation::Spawned
    );

    // The first refresh is still computing when its lock expires.
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(
        harness
            .store
            .set_if_absent(&key.lock_key(), "other-worker".into(), Duration::from_secs(30))
            .await
            .expect("take expired lock")
    );

    harness.settle().await;
    assert_eq!(harness.repo.aggregate_calls(), 1);

    let lock = harness
        .store
        .get(&key.lock_key())
        .await
        .expect("cache read")
        .expect("successor lock kept");
    assert_eq!(lock.payload, "other-worker");
    assert!(
        !harness
            .store
            .set_if_absent(&key.lock_key(), "third".into(), Duration::from_secs(30))
            .await
            .expect("contend")
    );
}
