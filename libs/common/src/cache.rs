//! Redis cache module shared by the services
//!
//! This module provides functionality for connecting to Redis and performing
//! cache operations like get and set with TTL support. Batched writes and
//! deletes go out as a single pipelined transaction so that a group of keys is
//! written or removed together.

use std::time::Duration;

use anyhow::{Context, Result};
use redis::{AsyncCommands, Client};
use tracing::info;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Upper bound for a single cache round trip, in milliseconds
    pub operation_timeout_ms: u64,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    /// - `REDIS_OPERATION_TIMEOUT_MS`: Per-operation timeout (default: 250)
    pub fn from_env() -> Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let operation_timeout_ms = std::env::var("REDIS_OPERATION_TIMEOUT_MS")
            .unwrap_or_else(|_| "250".to_string())
            .parse()
            .unwrap_or(250);

        Ok(RedisConfig {
            url,
            operation_timeout_ms,
        })
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Redis connection pool
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    timeout: Duration,
}

impl RedisPool {
    /// Initialize a new Redis connection pool
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool {
            client,
            timeout: config.operation_timeout(),
        })
    }

    /// Get a connection from the pool
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Run a cache round trip, failing once the configured timeout elapses
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .with_context(|| format!("redis {} timed out after {:?}", op, self.timeout))?
    }

    /// Set a key-value pair in Redis with optional TTL
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        self.bounded("SET", async {
            let mut conn = self.get_connection().await?;

            if let Some(ttl) = ttl_seconds {
                let _: () = conn.set_ex(key, value, ttl).await?;
            } else {
                let _: () = conn.set(key, value).await?;
            }

            Ok(())
        })
        .await
    }

    /// Set several key-value pairs with the same TTL in one MULTI/EXEC pipeline
    pub async fn set_many(&self, entries: &[(String, String)], ttl_seconds: u64) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        self.bounded("MULTI SET", async {
            let mut conn = self.get_connection().await?;
            let mut pipe = redis::pipe();
            pipe.atomic();
            for (key, value) in entries {
                pipe.set_ex(key, value, ttl_seconds).ignore();
            }
            let _: () = pipe.query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    /// Get a value from Redis by key
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.bounded("GET", async {
            let mut conn = self.get_connection().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    /// Delete a key from Redis
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.bounded("DEL", async {
            let mut conn = self.get_connection().await?;
            let _: u64 = conn.del(key).await?;
            Ok(())
        })
        .await
    }

    /// Delete several keys in a single command; missing keys are ignored
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        self.bounded("DEL", async {
            let mut conn = self.get_connection().await?;
            let removed: u64 = conn.del(keys).await?;
            Ok(removed)
        })
        .await
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        self.bounded("PING", async {
            let mut conn = self.get_connection().await?;
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(pong == "PONG")
        })
        .await
    }
}
