//! Redis-backed user cache
//!
//! Entries are JSON-encoded users stored under `user:id:{id}` and
//! `user:username:{username}`. Both keys are written in one MULTI/EXEC
//! pipeline with the same TTL and deleted with a single `DEL`.

use async_trait::async_trait;
use common::cache::RedisPool;
use tracing::{debug, warn};

use crate::cache::{DEFAULT_CACHE_TTL_SECS, UserCache};
use crate::models::User;

fn id_key(id: i64) -> String {
    format!("user:id:{}", id)
}

fn username_key(username: &str) -> String {
    format!("user:username:{}", username)
}

/// User cache stored in Redis
#[derive(Clone)]
pub struct RedisUserCache {
    pool: RedisPool,
    ttl_seconds: u64,
}

impl RedisUserCache {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            ttl_seconds: DEFAULT_CACHE_TTL_SECS,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds.max(1);
        self
    }

    async fn load(&self, key: &str) -> Option<User> {
        let raw = match self.pool.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("User cache read of {} failed, treating as miss: {:#}", key, e);
                return None;
            }
        };

        match serde_json::from_str::<User>(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!("Discarding undecodable user cache entry {}: {}", key, e);
                if let Err(e) = self.pool.delete(key).await {
                    debug!("Could not drop undecodable entry {}: {:#}", key, e);
                }
                None
            }
        }
    }

    async fn remove(&self, keys: Vec<String>) {
        if let Err(e) = self.pool.delete_many(&keys).await {
            warn!("User cache invalidation of {:?} failed: {:#}", keys, e);
        }
    }
}

#[async_trait]
impl UserCache for RedisUserCache {
    async fn get_by_id(&self, id: i64) -> Option<User> {
        self.load(&id_key(id)).await
    }

    async fn get_by_username(&self, username: &str) -> Option<User> {
        // A username entry left over from a renamed user must not resolve.
        self.load(&username_key(username))
            .await
            .filter(|user| user.username == username)
    }

    async fn put(&self, user: &User) {
        let payload = match serde_json::to_string(user) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not encode user {} for caching: {}", user.id, e);
                return;
            }
        };

        let entries = [
            (id_key(user.id), payload.clone()),
            (username_key(&user.username), payload),
        ];
        if let Err(e) = self.pool.set_many(&entries, self.ttl_seconds).await {
            warn!("User cache write for user {} failed: {:#}", user.id, e);
        }
    }

    async fn invalidate(&self, user: &User) {
        self.remove(vec![id_key(user.id), username_key(&user.username)])
            .await;
    }

    async fn invalidate_by_id(&self, id: i64) {
        match self.load(&id_key(id)).await {
            Some(user) => self.invalidate(&user).await,
            None => self.remove(vec![id_key(id)]).await,
        }
    }
}
