//! Integration tests against live PostgreSQL and Redis instances
//!
//! Run with `cargo test -- --ignored` once `DATABASE_URL` and `REDIS_URL`
//! point at disposable services.

use std::time::Duration;

use common::{
    cache::{RedisConfig, RedisPool},
    database::{DatabaseConfig, health_check, init_pool},
};
use serial_test::serial;

async fn redis() -> RedisPool {
    let config = RedisConfig::from_env().unwrap();
    let pool = RedisPool::new(&config).await.unwrap();
    assert!(pool.health_check().await.unwrap(), "Redis health check failed");
    pool
}

fn pair(prefix: &str) -> Vec<(String, String)> {
    vec![
        (format!("{}:id:1", prefix), "first".to_string()),
        (format!("{}:username:first", prefix), "first".to_string()),
    ]
}

#[tokio::test]
#[serial]
#[ignore = "requires a running PostgreSQL instance"]
async fn test_pool_answers_health_check() {
    let config = DatabaseConfig::from_env().unwrap();
    let pool = init_pool(&config).await.unwrap();
    assert!(health_check(&pool).await.unwrap());

    pool.close().await;
    assert!(!health_check(&pool).await.unwrap());
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis instance"]
async fn test_set_many_keys_expire_together() {
    let pool = redis().await;
    let entries = pair("it:ttl");

    pool.set_many(&entries, 1).await.unwrap();
    for (key, value) in &entries {
        assert_eq!(pool.get(key).await.unwrap().as_deref(), Some(value.as_str()));
    }

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    for (key, _) in &entries {
        assert_eq!(pool.get(key).await.unwrap(), None, "{} outlived its TTL", key);
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis instance"]
async fn test_delete_many_counts_removed_keys() {
    let pool = redis().await;
    let entries = pair("it:del");
    let keys: Vec<String> = entries.iter().map(|(key, _)| key.clone()).collect();

    pool.set_many(&entries, 30).await.unwrap();
    assert_eq!(pool.delete_many(&keys).await.unwrap(), 2);
    assert_eq!(pool.delete_many(&keys).await.unwrap(), 0);
    assert_eq!(pool.delete_many(&[]).await.unwrap(), 0);
    assert_eq!(pool.get(&keys[0]).await.unwrap(), None);
}

#[tokio::test]
#[serial]
#[ignore = "requires a running Redis instance"]
async fn test_operation_timeout_is_read_from_env() {
    unsafe {
        std::env::set_var("REDIS_OPERATION_TIMEOUT_MS", "150");
    }
    let config = RedisConfig::from_env().unwrap();
    unsafe {
        std::env::remove_var("REDIS_OPERATION_TIMEOUT_MS");
    }
    assert_eq!(config.operation_timeout(), Duration::from_millis(150));

    let pool = RedisPool::new(&config).await.unwrap();
    pool.set("it:timeout", "v", Some(5)).await.unwrap();
    assert_eq!(pool.get("it:timeout").await.unwrap().as_deref(), Some("v"));
    pool.delete("it:timeout").await.unwrap();
}
