//! Cache-aside layer for user records
//!
//! A cached user is one logical entry reachable through two keys, its id and
//! its username. Implementations write and invalidate both keys together and
//! never report failures: an unreachable cache behaves like an empty one,
//! since the [`UserDirectory`] stays the authority.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::IamResult;
use crate::models::User;
use crate::repositories::UserDirectory;

pub mod memory;
pub mod noop;
pub mod redis;

pub use memory::InMemoryUserCache;
pub use noop::NoopUserCache;
pub use redis::RedisUserCache;

/// Default lifetime of a cached user entry
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60;

/// Time-boxed copy of user records keyed by id and by username.
#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Option<User>;

    async fn get_by_username(&self, username: &str) -> Option<User>;

    /// Write both index entries with the same expiry in one batch.
    async fn put(&self, user: &User);

    /// Remove both index entries of `user`. Idempotent.
    async fn invalidate(&self, user: &User);

    /// Remove the entry for `id`, resolving its username through the
    /// id-keyed entry. Only the id key is cleared when that entry is gone.
    async fn invalidate_by_id(&self, id: i64);
}

/// Cache-aside reads over a [`UserDirectory`].
///
/// Reads go to the cache first and fall back to the directory on a miss,
/// populating the cache with what they found. Writers are expected to call
/// one of the `invalidate` methods after every successful directory write.
#[derive(Clone)]
pub struct CachedDirectory {
    directory: Arc<dyn UserDirectory>,
    cache: Arc<dyn UserCache>,
}

impl CachedDirectory {
    pub fn new(directory: Arc<dyn UserDirectory>, cache: Arc<dyn UserCache>) -> Self {
        Self { directory, cache }
    }

    /// Direct access to the store, bypassing the cache
    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    pub fn cache(&self) -> &Arc<dyn UserCache> {
        &self.cache
    }

    pub async fn user_by_id(&self, id: i64) -> IamResult<Option<User>> {
        if let Some(user) = self.cache.get_by_id(id).await {
            debug!("User cache hit for id {}", id);
            return Ok(Some(user));
        }

        let user = self.directory.find_by_id(id).await?;
        if let Some(user) = &user {
            self.cache.put(user).await;
        }
        Ok(user)
    }

    pub async fn user_by_username(&self, username: &str) -> IamResult<Option<User>> {
        if let Some(user) = self.cache.get_by_username(username).await {
            debug!("User cache hit for username {}", username);
            return Ok(Some(user));
        }

        let user = self.directory.find_by_username(username).await?;
        if let Some(user) = &user {
            self.cache.put(user).await;
        }
        Ok(user)
    }

    /// Like [`Self::user_by_username`] but a miss leaves the cache untouched,
    /// for callers that must vet the record before caching it.
    pub async fn peek_by_username(&self, username: &str) -> IamResult<Option<User>> {
        match self.cache.get_by_username(username).await {
            Some(user) => Ok(Some(user)),
            None => self.directory.find_by_username(username).await,
        }
    }

    pub async fn invalidate(&self, user: &User) {
        self.cache.invalidate(user).await;
    }

    /// Drop every cached key of user `id`.
    ///
    /// When the id-keyed entry is already gone the username is looked up in
    /// the directory, tombstoned users included. A user that no longer
    /// exists at all is not an error.
    pub async fn invalidate_by_id(&self, id: i64) {
        if let Some(cached) = self.cache.get_by_id(id).await {
            self.cache.invalidate(&cached).await;
            return;
        }

        match self.directory.find_any_by_id(id).await {
            Ok(Some(user)) => self.cache.invalidate(&user).await,
            Ok(None) => self.cache.invalidate_by_id(id).await,
            Err(e) => {
                warn!(
                    "Could not resolve user {} for cache invalidation: {}",
                    id, e
                );
                self.cache.invalidate_by_id(id).await;
            }
        }
    }
}
