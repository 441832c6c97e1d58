//! Postgres store round-trips.
//!
//! Requires `DATABASE_URL`; run with `cargo test -- --ignored`.

use cache_cascade::cascade::QueueStore;
use cache_cascade::infra::db::PgQueueStore;
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn upsert_load_and_delete(pool: PgPool) {
    let store = PgQueueStore::new(pool);

    assert!(store.load("cascade_queue").await.unwrap().is_none());

    let first = json!([{ "slug": "object_cache", "expires": 10, "delay": 10 }]);
    store.save("cascade_queue", first.clone()).await.unwrap();
    assert_eq!(store.load("cascade_queue").await.unwrap(), Some(first));

    let second = json!([{ "slug": "cloudflare", "expires": 200, "delay": 100 }]);
    store.save("cascade_queue", second.clone()).await.unwrap();
    assert_eq!(store.load("cascade_queue").await.unwrap(), Some(second));

    store.delete("cascade_queue").await.unwrap();
    store.delete("cascade_queue").await.unwrap();
    assert!(store.load("cascade_queue").await.unwrap().is_none());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn keys_are_independent(pool: PgPool) {
    let store = PgQueueStore::new(pool);

    store.save("a", json!([])).await.unwrap();
    store.save("b", json!([1])).await.unwrap();
    store.delete("a").await.unwrap();

    assert!(store.load("a").await.unwrap().is_none());
    assert_eq!(store.load("b").await.unwrap(), Some(json!([1])));
}
