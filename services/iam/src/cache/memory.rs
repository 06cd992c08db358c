//! Process-local user cache

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::cache::{DEFAULT_CACHE_TTL_SECS, UserCache};
use crate::clock::{Clock, SystemClock};
use crate::models::User;

#[derive(Debug, Clone)]
struct Entry {
    user: User,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Entries {
    by_id: HashMap<i64, Entry>,
    by_username: HashMap<String, i64>,
}

impl Entries {
    fn remove(&mut self, id: i64, username: &str) {
        self.by_id.remove(&id);
        if self.by_username.get(username) == Some(&id) {
            self.by_username.remove(username);
        }
    }
}

/// In-memory user cache with one entry per user and two indexes.
///
/// Expired entries are dropped lazily on read.
pub struct InMemoryUserCache {
    entries: Mutex<Entries>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl Default for InMemoryUserCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            clock: Arc::new(SystemClock),
            ttl: Duration::seconds(DEFAULT_CACHE_TTL_SECS as i64),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Number of live entries, expired ones included until they are read
    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lookup(&self, entries: &mut Entries, id: i64) -> Option<User> {
        let entry = entries.by_id.get(&id)?;
        if self.clock.now() >= entry.expires_at {
            let username = entry.user.username.clone();
            entries.remove(id, &username);
            return None;
        }
        Some(entry.user.clone())
    }
}

#[async_trait]
impl UserCache for InMemoryUserCache {
    async fn get_by_id(&self, id: i64) -> Option<User> {
        let mut entries = self.lock();
        self.lookup(&mut entries, id)
    }

    async fn get_by_username(&self, username: &str) -> Option<User> {
        let mut entries = self.lock();
        let id = *entries.by_username.get(username)?;
        self.lookup(&mut entries, id)
            .filter(|user| user.username == username)
    }

    async fn put(&self, user: &User) {
        let expires_at = self.clock.now() + self.ttl;
        let mut entries = self.lock();

        // A renamed user must not stay reachable under its old name.
        if let Some(previous) = entries.by_id.get(&user.id) {
            let previous_username = previous.user.username.clone();
            entries.remove(user.id, &previous_username);
        }

        entries.by_username.insert(user.username.clone(), user.id);
        entries.by_id.insert(
            user.id,
            Entry {
                user: user.clone(),
                expires_at,
            },
        );
    }

    async fn invalidate(&self, user: &User) {
        self.lock().remove(user.id, &user.username);
    }

    async fn invalidate_by_id(&self, id: i64) {
        let mut entries = self.lock();
        match entries.by_id.get(&id) {
            Some(entry) => {
                let username = entry.user.username.clone();
                entries.remove(id, &username);
            }
            None => {
                entries.by_id.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::UserStatus;

    fn user(id: i64, username: &str, now: DateTime<Utc>) -> User {
        User {
            id,
            username: username.to_string(),
            nickname: format!("{} nick", username),
            email: format!("{}@example.com", username),
            phone: String::new(),
            avatar: String::new(),
            status: UserStatus::Active,
            role_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_put_is_visible_through_both_keys() {
        let cache = InMemoryUserCache::new();
        let alice = user(1, "alice", Utc::now());

        cache.put(&alice).await;
        assert_eq!(cache.get_by_id(1).await, Some(alice.clone()));
        assert_eq!(cache.get_by_username("alice").await, Some(alice.clone()));

        cache.invalidate_by_id(1).await;
        assert_eq!(cache.get_by_id(1).await, None);
        assert_eq!(cache.get_by_username("alice").await, None);

        // Invalidating an absent entry twice is a no-op.
        cache.invalidate(&alice).await;
        cache.invalidate_by_id(1).await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_entries_expire_passively() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let cache = InMemoryUserCache::new()
            .with_clock(clock.clone())
            .with_ttl(Duration::hours(1));

        cache.put(&user(1, "alice", start)).await;
        clock.advance(Duration::minutes(59));
        assert!(cache.get_by_username("alice").await.is_some());

        clock.advance(Duration::minutes(1));
        assert_eq!(cache.get_by_id(1).await, None);
        assert_eq!(cache.get_by_username("alice").await, None);
    }

    #[tokio::test]
    async fn test_rename_drops_old_username_key() {
        let now = Utc::now();
        let cache = InMemoryUserCache::new();
        cache.put(&user(1, "alice", now)).await;
        cache.put(&user(1, "alicia", now)).await;

        assert_eq!(cache.get_by_username("alice").await, None);
        assert_eq!(
            cache.get_by_username("alicia").await.map(|u| u.id),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_username_reused_by_another_user() {
        let now = Utc::now();
        let cache = InMemoryUserCache::new();
        let old = user(1, "alice", now);
        cache.put(&old).await;
        cache.put(&user(2, "alice", now)).await;

        // Invalidating the old holder leaves the new holder reachable.
        cache.invalidate(&old).await;
        assert_eq!(cache.get_by_username("alice").await.map(|u| u.id), Some(2));
    }
}
