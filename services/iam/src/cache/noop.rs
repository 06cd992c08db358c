use async_trait::async_trait;

use crate::cache::UserCache;
use crate::models::User;

/// Cache that stores nothing; every read is a miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUserCache;

#[async_trait]
impl UserCache for NoopUserCache {
    async fn get_by_id(&self, _id: i64) -> Option<User> {
        None
    }

    async fn get_by_username(&self, _username: &str) -> Option<User> {
        None
    }

    async fn put(&self, _user: &User) {}

    async fn invalidate(&self, _user: &User) {}

    async fn invalidate_by_id(&self, _id: i64) {}
}
