//! Persistence boundary for users, roles and permissions
//!
//! [`UserDirectory`] is the source of truth for user records and
//! [`PermissionGraph`] holds roles, permissions and their assignments.
//! [`OperationLogStore`] keeps the request audit trail. Each has a PostgreSQL
//! implementation and an in-memory one for tests and local development.

use async_trait::async_trait;

use crate::error::IamResult;
use crate::models::{
    LogFilter, NewOperationLog, NewPermission, NewRole, NewUser, OperationLog, Page, Permission,
    ProfileUpdate, RecordStatus, Role, UpdatePermission, UpdateRole, User, UserCredential,
    UserFilter, UserStatus,
};

pub mod memory;
pub mod operation_log;
pub mod rbac;
pub mod user;

pub use memory::InMemoryStore;
pub use operation_log::PgOperationLogStore;
pub use rbac::PgPermissionGraph;
pub use user::PgUserDirectory;

/// Longest role chain followed when deriving inherited permissions
pub const DEFAULT_MAX_ROLE_DEPTH: u32 = 16;

/// Durable store of user records.
///
/// Lookups skip tombstoned users unless the method says otherwise. Every
/// write is atomic on its own; callers holding a user cache must invalidate
/// it after each successful write.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Insert a user. Fails with `Conflict` when the username is taken by a live user.
    async fn create(&self, new_user: &NewUser) -> IamResult<User>;

    /// Apply a profile update. A username change is subject to the same uniqueness rule.
    async fn update(&self, id: i64, update: &ProfileUpdate) -> IamResult<User>;

    async fn update_status(&self, id: i64, status: UserStatus) -> IamResult<User>;

    async fn update_role(&self, id: i64, role_id: Option<i64>) -> IamResult<User>;

    async fn set_password(&self, id: i64, password_hash: &str) -> IamResult<()>;

    async fn find_by_id(&self, id: i64) -> IamResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> IamResult<Option<User>>;

    /// Like `find_by_id` but also returns tombstoned users.
    async fn find_any_by_id(&self, id: i64) -> IamResult<Option<User>>;

    /// Current password hash and status of a live user.
    async fn find_credential(&self, id: i64) -> IamResult<Option<UserCredential>>;

    /// Live users matching `filter`, newest first.
    async fn list_page(&self, filter: &UserFilter) -> IamResult<Page<User>>;

    /// Tombstone a live user and return the tombstoned record.
    async fn soft_delete(&self, id: i64) -> IamResult<User>;

    /// Clear the tombstone. Fails with `Conflict` when the user is not deleted
    /// or its username now belongs to another live user.
    async fn restore(&self, id: i64) -> IamResult<User>;
}

/// Roles, permissions and the role-permission relation.
#[async_trait]
pub trait PermissionGraph: Send + Sync {
    async fn create_role(&self, role: &NewRole) -> IamResult<Role>;

    /// Update a role. Rejects a parent that is the role itself or one of its
    /// descendants.
    async fn update_role(&self, id: i64, update: &UpdateRole) -> IamResult<Role>;

    /// Delete a role; its assignments go with it and its users lose their role.
    async fn delete_role(&self, id: i64) -> IamResult<()>;

    async fn find_role(&self, id: i64) -> IamResult<Option<Role>>;

    async fn find_role_by_code(&self, code: &str) -> IamResult<Option<Role>>;

    /// All roles ordered by sort key, then id.
    async fn list_roles(&self) -> IamResult<Vec<Role>>;

    async fn create_permission(&self, permission: &NewPermission) -> IamResult<Permission>;

    async fn update_permission(&self, id: i64, update: &UpdatePermission)
    -> IamResult<Permission>;

    async fn set_permission_status(&self, id: i64, status: RecordStatus)
    -> IamResult<Permission>;

    async fn delete_permission(&self, id: i64) -> IamResult<()>;

    /// All permissions ordered by sort key, then id.
    async fn list_permissions(&self) -> IamResult<Vec<Permission>>;

    /// Permissions directly assigned to a role, regardless of status.
    async fn role_permissions(&self, role_id: i64) -> IamResult<Vec<Permission>>;

    /// Replace the role's assignment set in one transaction. Readers observe
    /// either the previous set or the new one, never a mix.
    async fn replace_role_permissions(&self, role_id: i64, permission_ids: &[i64])
    -> IamResult<()>;

    /// Active permissions reachable from the user's role chain, ordered by
    /// sort key, then id. Empty for unknown, tombstoned or role-less users.
    async fn permissions_of_user(&self, user_id: i64) -> IamResult<Vec<Permission>>;

    /// Whether `permissions_of_user(user_id)` contains `code`, answered in one lookup.
    async fn has_permission(&self, user_id: i64, code: &str) -> IamResult<bool>;
}

/// Append-only audit trail of handled requests.
#[async_trait]
pub trait OperationLogStore: Send + Sync {
    async fn record(&self, entry: &NewOperationLog) -> IamResult<OperationLog>;

    /// Entries matching `filter`, newest first.
    async fn list_logs(&self, filter: &LogFilter) -> IamResult<Page<OperationLog>>;
}
