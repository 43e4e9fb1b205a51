mod common;

use std::time::Duration;

use sqlx::PgPool;
use time::OffsetDateTime;

use alphafeed::application::repos::MentionsRepo;
use alphafeed::cache::CacheStore;
use alphafeed::domain::mentions::{AggregateField, AggregateOrder};
use alphafeed::domain::trending::{SortOrder, TimeWindow};
use alphafeed::infra::db::{PostgresCacheStore, PostgresRepositories};

use common::{mention_input, seed};

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn aggregate_groups_and_orders_mentions(pool: PgPool) {
    let repo = PostgresRepositories::new(pool);
    seed(&repo, "ABC", "eth", Some("0xAAA"), 5, 10).await;
    seed(&repo, "XYZ", "eth", Some("0xBBB"), 3, 10).await;
    seed(&repo, "OLD", "eth", None, 4, 60 * 48).await;

    let named = mention_input(
        "XYZ",
        "eth",
        Some("0xBBB"),
        OffsetDateTime::now_utc() - time::Duration::minutes(1),
    );
    let named = alphafeed::domain::mentions::MentionInput {
        token_name: Some("Xyz Token".into()),
        ..named
    };
    repo.record_mention(named.validate().expect("valid"))
        .await
        .expect("store");

    let desc = repo
        .aggregate(TimeWindow::days(1), 10, AggregateOrder::default())
        .await
        .expect("aggregate");
    let summary: Vec<_> = desc
        .iter()
        .map(|row| (row.ticker.as_str(), row.mention_count))
        .collect();
    assert_eq!(summary, [("ABC", 5), ("XYZ", 4)]);
    assert_eq!(desc[1].name.as_deref(), Some("Xyz Token"));

    let asc = repo
        .aggregate(
            TimeWindow::days(1),
            10,
            AggregateOrder::new(AggregateField::MentionCount, SortOrder::Asc),
        )
        .await
        .expect("aggregate");
    let reversed: Vec<_> = asc.into_iter().rev().collect();
    assert_eq!(reversed, desc);

    let limited = repo
        .aggregate(TimeWindow::days(3), 1, AggregateOrder::default())
        .await
        .expect("aggregate");
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].ticker, "ABC");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn resolve_network_prefers_most_frequent(pool: PgPool) {
    let repo = PostgresRepositories::new(pool);
    seed(&repo, "ABC", "sol", None, 2, 5).await;
    seed(&repo, "ABC", "eth", None, 2, 5).await;
    seed(&repo, "ABC", "base", None, 1, 5).await;

    assert_eq!(
        repo.resolve_network("ABC").await.expect("resolve").as_deref(),
        Some("eth")
    );
    assert_eq!(repo.resolve_network("NOPE").await.expect("resolve"), None);
    repo.ping().await.expect("ping");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn set_if_absent_respects_live_entries(pool: PgPool) {
    let store = PostgresCacheStore::new(pool);

    assert!(
        store
            .set_if_absent("k:lock", "a".into(), Duration::from_secs(30))
            .await
            .expect("first")
    );
    assert!(
        !store
            .set_if_absent("k:lock", "b".into(), Duration::from_secs(30))
            .await
            .expect("second")
    );
    let held = store.get("k:lock").await.expect("get").expect("present");
    assert_eq!(held.payload, "a");

    assert!(!store.release("k:lock", "b").await.expect("release foreign"));
    assert!(store.get("k:lock").await.expect("get").is_some());
    assert!(store.release("k:lock", "a").await.expect("release own"));
    assert!(store.get("k:lock").await.expect("get").is_none());

    store
        .put("k:lock", "x".into(), Duration::from_secs(30))
        .await
        .expect("put");
    store.delete("k:lock").await.expect("delete");
    assert!(
        store
            .set_if_absent("k:lock", "c".into(), Duration::from_secs(30))
            .await
            .expect("after delete")
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn expired_entries_are_invisible_and_purged(pool: PgPool) {
    let store = PostgresCacheStore::new(pool);

    store
        .put("gone", "[]".into(), Duration::ZERO)
        .await
        .expect("put");
    store
        .put("kept", "[]".into(), Duration::from_secs(60))
        .await
        .expect("put");

    assert!(store.get("gone").await.expect("get").is_none());
    assert!(
        store
            .set_if_absent("gone", "again".into(), Duration::from_secs(60))
            .await
            .expect("overwrite expired")
    );

    store
        .put("stale", "[]".into(), Duration::ZERO)
        .await
        .expect("put");
    assert_eq!(store.purge_expired().await.expect("purge"), 1);

    let kept = store.get("kept").await.expect("get").expect("present");
    assert!(kept.remaining() > Duration::from_secs(50));
}
