// These tests need a live Redis server and are ignored by default.
// Run with: REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored

use redis::AsyncCommands;
use tunnel_dns::store::{Lookup, RecordStore, RedisStore, StoreError, a_key, cname_key};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn raw_connection() -> redis::aio::MultiplexedConnection {
    redis::Client::open(redis_url())
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

#[tokio::test]
#[ignore]
async fn test_redis_ping() {
    let store = RedisStore::connect(&redis_url()).await.unwrap();
    store.ping().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_redis_found_and_absent() {
    let store = RedisStore::connect(&redis_url()).await.unwrap();
    let mut conn = raw_connection().await;

    let name = "redis-test-host.example.com.";
    let _: () = conn.set(a_key(name), "203.0.113.9").await.unwrap();
    let _: () = conn.del(cname_key(name)).await.unwrap();

    assert_eq!(
        store.lookup_a(name).await,
        Lookup::Found("203.0.113.9".to_string())
    );
    assert_eq!(store.lookup_cname(name).await, Lookup::Absent);

    let _: () = conn.del(a_key(name)).await.unwrap();
    assert_eq!(store.lookup_a(name).await, Lookup::Absent);
}

#[tokio::test]
#[ignore]
async fn test_redis_wrong_type_is_a_failure() {
    let store = RedisStore::connect(&redis_url()).await.unwrap();
    let mut conn = raw_connection().await;

    let name = "redis-test-list.example.com.";
    let _: () = conn.del(a_key(name)).await.unwrap();
    let _: () = conn.rpush(a_key(name), "203.0.113.9").await.unwrap();

    match store.lookup_a(name).await {
        Lookup::Failed(StoreError::Fatal(_)) => {}
        other => panic!("expected a fatal store error, got {:?}", other),
    }

    let _: () = conn.del(a_key(name)).await.unwrap();
}

#[tokio::test]
async fn test_connect_rejects_bad_url() {
    match RedisStore::connect("not-a-url").await {
        Err(StoreError::Fatal(_)) => {}
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("connect should fail"),
    }
}
