//! In-memory implementation of the repository traits.
//!
//! Intended for tests and local development. It mirrors the PostgreSQL
//! schema rules: live usernames and role/permission codes are unique,
//! deleting a role drops its assignments and detaches its users, and
//! deleting a permission drops its assignments. It also keeps the operation
//! log.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::clock::{Clock, SystemClock};
use crate::error::{IamError, IamResult};
use crate::models::{
    LogFilter, NewOperationLog, NewPermission, NewRole, NewUser, OperationLog, Page, Permission,
    ProfileUpdate, RecordStatus, Role, UpdatePermission, UpdateRole, User, UserCredential,
    UserFilter, UserStatus,
};
use crate::repositories::{
    DEFAULT_MAX_ROLE_DEPTH, OperationLogStore, PermissionGraph, UserDirectory,
};

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    password_hash: String,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<i64, StoredUser>,
    roles: BTreeMap<i64, Role>,
    permissions: BTreeMap<i64, Permission>,
    assignments: BTreeSet<(i64, i64)>,
    logs: Vec<OperationLog>,
    next_user_id: i64,
    next_role_id: i64,
    next_permission_id: i64,
}

impl State {
    fn username_taken(&self, username: &str, except: Option<i64>) -> bool {
        self.users.values().any(|stored| {
            stored.user.deleted_at.is_none()
                && stored.user.username == username
                && Some(stored.user.id) != except
        })
    }

    fn role_code_taken(&self, code: &str, except: Option<i64>) -> bool {
        self.roles
            .values()
            .any(|role| role.code == code && Some(role.id) != except)
    }

    fn permission_code_taken(&self, code: &str, except: Option<i64>) -> bool {
        self.permissions
            .values()
            .any(|permission| permission.code == code && Some(permission.id) != except)
    }

    fn live_user_mut(&mut self, id: i64) -> IamResult<&mut StoredUser> {
        self.users
            .get_mut(&id)
            .filter(|stored| stored.user.deleted_at.is_none())
            .ok_or_else(|| IamError::not_found(format!("user {}", id)))
    }

    /// Whether `candidate_parent` is `role_id` or reachable by walking down from it.
    fn would_cycle(&self, role_id: i64, candidate_parent: i64) -> bool {
        let mut seen = HashSet::new();
        let mut cursor = Some(candidate_parent);
        while let Some(current) = cursor {
            if current == role_id {
                return true;
            }
            if !seen.insert(current) {
                return false;
            }
            cursor = self.roles.get(&current).and_then(|role| role.parent_id);
        }
        false
    }

    /// Active roles on the user's chain, nearest first.
    fn role_chain(&self, user_id: i64, max_depth: u32) -> Vec<i64> {
        let Some(stored) = self.users.get(&user_id) else {
            return Vec::new();
        };
        if stored.user.deleted_at.is_some() {
            return Vec::new();
        }

        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = stored.user.role_id;
        while let Some(role_id) = cursor {
            if chain.len() as u32 >= max_depth || !visited.insert(role_id) {
                break;
            }
            match self.roles.get(&role_id) {
                Some(role) if role.status.is_active() => {
                    chain.push(role_id);
                    cursor = role.parent_id;
                }
                _ => break,
            }
        }
        chain
    }

    fn derive(&self, user_id: i64, max_depth: u32) -> Vec<Permission> {
        let chain = self.role_chain(user_id, max_depth);
        let ids: BTreeSet<i64> = self
            .assignments
            .iter()
            .filter(|(role_id, _)| chain.contains(role_id))
            .map(|(_, permission_id)| *permission_id)
            .collect();

        let mut permissions: Vec<Permission> = ids
            .iter()
            .filter_map(|id| self.permissions.get(id))
            .filter(|permission| permission.status.is_active())
            .cloned()
            .collect();
        permissions.sort_by_key(|p| (p.sort, p.id));
        permissions
    }
}

/// Thread-safe in-memory user directory, permission graph and operation log
pub struct InMemoryStore {
    state: RwLock<State>,
    clock: Arc<dyn Clock>,
    max_role_depth: u32,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            clock: Arc::new(SystemClock),
            max_role_depth: DEFAULT_MAX_ROLE_DEPTH,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_role_depth(mut self, depth: u32) -> Self {
        self.max_role_depth = depth.max(1);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }
}

fn username_conflict(username: &str) -> IamError {
    IamError::Conflict(format!("username '{}' is already taken", username))
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn create(&self, new_user: &NewUser) -> IamResult<User> {
        let now = self.clock.now();
        let mut state = self.write();
        if state.username_taken(&new_user.username, None) {
            return Err(username_conflict(&new_user.username));
        }

        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            username: new_user.username.clone(),
            nickname: new_user.nickname.clone(),
            email: new_user.email.clone(),
            phone: new_user.phone.clone(),
            avatar: new_user.avatar.clone(),
            status: new_user.status,
            role_id: new_user.role_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.users.insert(
            user.id,
            StoredUser {
                user: user.clone(),
                password_hash: new_user.password_hash.clone(),
            },
        );
        Ok(user)
    }

    async fn update(&self, id: i64, update: &ProfileUpdate) -> IamResult<User> {
        let now = self.clock.now();
        let mut state = self.write();
        if let Some(username) = &update.username {
            if state.username_taken(username, Some(id)) {
                return Err(username_conflict(username));
            }
        }

        let stored = state.live_user_mut(id)?;
        update.apply(&mut stored.user);
        stored.user.updated_at = now;
        Ok(stored.user.clone())
    }

    async fn update_status(&self, id: i64, status: UserStatus) -> IamResult<User> {
        let now = self.clock.now();
        let mut state = self.write();
        let stored = state.live_user_mut(id)?;
        stored.user.status = status;
        stored.user.updated_at = now;
        Ok(stored.user.clone())
    }

    async fn update_role(&self, id: i64, role_id: Option<i64>) -> IamResult<User> {
        let now = self.clock.now();
        let mut state = self.write();
        if let Some(role_id) = role_id {
            if !state.roles.contains_key(&role_id) {
                return Err(IamError::not_found(format!("role {}", role_id)));
            }
        }
        let stored = state.live_user_mut(id)?;
        stored.user.role_id = role_id;
        stored.user.updated_at = now;
        Ok(stored.user.clone())
    }

    async fn set_password(&self, id: i64, password_hash: &str) -> IamResult<()> {
        let now = self.clock.now();
        let mut state = self.write();
        let stored = state.live_user_mut(id)?;
        stored.password_hash = password_hash.to_string();
        stored.user.updated_at = now;
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> IamResult<Option<User>> {
        Ok(self
            .read()
            .users
            .get(&id)
            .filter(|stored| stored.user.deleted_at.is_none())
            .map(|stored| stored.user.clone()))
    }

    async fn find_by_username(&self, username: &str) -> IamResult<Option<User>> {
        Ok(self
            .read()
            .users
            .values()
            .find(|stored| stored.user.deleted_at.is_none() && stored.user.username == username)
            .map(|stored| stored.user.clone()))
    }

    async fn find_any_by_id(&self, id: i64) -> IamResult<Option<User>> {
        Ok(self.read().users.get(&id).map(|stored| stored.user.clone()))
    }

    async fn find_credential(&self, id: i64) -> IamResult<Option<UserCredential>> {
        Ok(self
            .read()
            .users
            .get(&id)
            .filter(|stored| stored.user.deleted_at.is_none())
            .map(|stored| UserCredential {
                user_id: stored.user.id,
                password_hash: stored.password_hash.clone(),
                status: stored.user.status,
            }))
    }

    async fn list_page(&self, filter: &UserFilter) -> IamResult<Page<User>> {
        let state = self.read();
        let matching: Vec<&User> = state
            .users
            .values()
            .rev()
            .map(|stored| &stored.user)
            .filter(|user| user.deleted_at.is_none() && filter.matches(user))
            .collect();

        let items = matching
            .iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .map(|user| (*user).clone())
            .collect();

        Ok(Page {
            items,
            total: matching.len() as i64,
            page: filter.page.max(1),
            page_size: filter.limit() as u32,
        })
    }

    async fn soft_delete(&self, id: i64) -> IamResult<User> {
        let now = self.clock.now();
        let mut state = self.write();
        let stored = state.live_user_mut(id)?;
        stored.user.deleted_at = Some(now);
        stored.user.updated_at = now;
        Ok(stored.user.clone())
    }

    async fn restore(&self, id: i64) -> IamResult<User> {
        let now = self.clock.now();
        let mut state = self.write();
        let username = match state.users.get(&id) {
            None => return Err(IamError::not_found(format!("user {}", id))),
            Some(stored) if stored.user.deleted_at.is_none() => {
                return Err(IamError::Conflict(format!("user {} is not deleted", id)));
            }
            Some(stored) => stored.user.username.clone(),
        };
        if state.username_taken(&username, Some(id)) {
            return Err(username_conflict(&username));
        }

        let stored = state
            .users
            .get_mut(&id)
            .ok_or_else(|| IamError::not_found(format!("user {}", id)))?;
        stored.user.deleted_at = None;
        stored.user.updated_at = now;
        Ok(stored.user.clone())
    }
}

#[async_trait]
impl PermissionGraph for InMemoryStore {
    async fn create_role(&self, new_role: &NewRole) -> IamResult<Role> {
        let now = self.clock.now();
        let mut state = self.write();
        if state.role_code_taken(&new_role.code, None) {
            return Err(IamError::Conflict(format!(
                "role code '{}' is already taken",
                new_role.code
            )));
        }
        if let Some(parent_id) = new_role.parent_id {
            if !state.roles.contains_key(&parent_id) {
                return Err(IamError::not_found(format!("role {}", parent_id)));
            }
        }

        state.next_role_id += 1;
        let role = Role {
            id: state.next_role_id,
            name: new_role.name.clone(),
            code: new_role.code.clone(),
            description: new_role.description.clone(),
            parent_id: new_role.parent_id,
            data_scope: new_role.data_scope.clone(),
            sort: new_role.sort,
            status: new_role.status,
            created_at: now,
            updated_at: now,
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(&self, id: i64, update: &UpdateRole) -> IamResult<Role> {
        let now = self.clock.now();
        let mut state = self.write();
        if !state.roles.contains_key(&id) {
            return Err(IamError::not_found(format!("role {}", id)));
        }
        if let Some(code) = &update.code {
            if state.role_code_taken(code, Some(id)) {
                return Err(IamError::Conflict(format!(
                    "role code '{}' is already taken",
                    code
                )));
            }
        }
        if let Some(Some(parent_id)) = update.parent_id {
            if !state.roles.contains_key(&parent_id) {
                return Err(IamError::not_found(format!("role {}", parent_id)));
            }
            if state.would_cycle(id, parent_id) {
                return Err(IamError::Conflict(format!(
                    "role {} cannot inherit from role {}: it would form a cycle",
                    id, parent_id
                )));
            }
        }

        let role = state
            .roles
            .get_mut(&id)
            .ok_or_else(|| IamError::not_found(format!("role {}", id)))?;
        update.apply(role);
        role.updated_at = now;
        Ok(role.clone())
    }

    async fn delete_role(&self, id: i64) -> IamResult<()> {
        let mut state = self.write();
        if state.roles.remove(&id).is_none() {
            return Err(IamError::not_found(format!("role {}", id)));
        }
        state.assignments.retain(|(role_id, _)| *role_id != id);
        for role in state.roles.values_mut() {
            if role.parent_id == Some(id) {
                role.parent_id = None;
            }
        }
        for stored in state.users.values_mut() {
            if stored.user.role_id == Some(id) {
                stored.user.role_id = None;
            }
        }
        Ok(())
    }

    async fn find_role(&self, id: i64) -> IamResult<Option<Role>> {
        Ok(self.read().roles.get(&id).cloned())
    }

    async fn find_role_by_code(&self, code: &str) -> IamResult<Option<Role>> {
        Ok(self
            .read()
            .roles
            .values()
            .find(|role| role.code == code)
            .cloned())
    }

    async fn list_roles(&self) -> IamResult<Vec<Role>> {
        let mut roles: Vec<Role> = self.read().roles.values().cloned().collect();
        roles.sort_by_key(|r| (r.sort, r.id));
        Ok(roles)
    }

    async fn create_permission(&self, new_permission: &NewPermission) -> IamResult<Permission> {
        let now = self.clock.now();
        let mut state = self.write();
        if state.permission_code_taken(&new_permission.code, None) {
            return Err(IamError::Conflict(format!(
                "permission code '{}' is already taken",
                new_permission.code
            )));
        }

        state.next_permission_id += 1;
        let permission = Permission {
            id: state.next_permission_id,
            name: new_permission.name.clone(),
            code: new_permission.code.clone(),
            kind: new_permission.kind,
            parent_id: new_permission.parent_id,
            sort: new_permission.sort,
            status: new_permission.status,
            meta: new_permission.meta.clone(),
            created_at: now,
            updated_at: now,
        };
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn update_permission(
        &self,
        id: i64,
        update: &UpdatePermission,
    ) -> IamResult<Permission> {
        let now = self.clock.now();
        let mut state = self.write();
        if let Some(code) = &update.code {
            if state.permission_code_taken(code, Some(id)) {
                return Err(IamError::Conflict(format!(
                    "permission code '{}' is already taken",
                    code
                )));
            }
        }
        let permission = state
            .permissions
            .get_mut(&id)
            .ok_or_else(|| IamError::not_found(format!("permission {}", id)))?;
        update.apply(permission);
        permission.updated_at = now;
        Ok(permission.clone())
    }

    async fn set_permission_status(
        &self,
        id: i64,
        status: RecordStatus,
    ) -> IamResult<Permission> {
        let now = self.clock.now();
        let mut state = self.write();
        let permission = state
            .permissions
            .get_mut(&id)
            .ok_or_else(|| IamError::not_found(format!("permission {}", id)))?;
        permission.status = status;
        permission.updated_at = now;
        Ok(permission.clone())
    }

    async fn delete_permission(&self, id: i64) -> IamResult<()> {
        let mut state = self.write();
        if state.permissions.remove(&id).is_none() {
            return Err(IamError::not_found(format!("permission {}", id)));
        }
        state
            .assignments
            .retain(|(_, permission_id)| *permission_id != id);
        for permission in state.permissions.values_mut() {
            if permission.parent_id == Some(id) {
                permission.parent_id = None;
            }
        }
        Ok(())
    }

    async fn list_permissions(&self) -> IamResult<Vec<Permission>> {
        let mut permissions: Vec<Permission> =
            self.read().permissions.values().cloned().collect();
        permissions.sort_by_key(|p| (p.sort, p.id));
        Ok(permissions)
    }

    async fn role_permissions(&self, role_id: i64) -> IamResult<Vec<Permission>> {
        let state = self.read();
        let mut permissions: Vec<Permission> = state
            .assignments
            .iter()
            .filter(|(assigned_role, _)| *assigned_role == role_id)
            .filter_map(|(_, permission_id)| state.permissions.get(permission_id))
            .cloned()
            .collect();
        permissions.sort_by_key(|p| (p.sort, p.id));
        Ok(permissions)
    }

    async fn replace_role_permissions(
        &self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> IamResult<()> {
        // One write guard covers the whole swap.
        let mut state = self.write();
        if !state.roles.contains_key(&role_id) {
            return Err(IamError::not_found(format!("role {}", role_id)));
        }
        if let Some(missing) = permission_ids
            .iter()
            .find(|id| !state.permissions.contains_key(*id))
        {
            return Err(IamError::Transaction(format!(
                "permission {} does not exist",
                missing
            )));
        }

        state
            .assignments
            .retain(|(assigned_role, _)| *assigned_role != role_id);
        state.assignments.extend(
            permission_ids
                .iter()
                .map(|permission_id| (role_id, *permission_id)),
        );
        Ok(())
    }

    async fn permissions_of_user(&self, user_id: i64) -> IamResult<Vec<Permission>> {
        Ok(self.read().derive(user_id, self.max_role_depth))
    }

    async fn has_permission(&self, user_id: i64, code: &str) -> IamResult<bool> {
        Ok(self
            .read()
            .derive(user_id, self.max_role_depth)
            .iter()
            .any(|permission| permission.code == code))
    }
}

#[async_trait]
impl OperationLogStore for InMemoryStore {
    async fn record(&self, entry: &NewOperationLog) -> IamResult<OperationLog> {
        let now = self.clock.now();
        let mut state = self.write();
        let log = OperationLog {
            id: state.logs.len() as i64 + 1,
            user_id: entry.user_id,
            ip: entry.ip.clone(),
            method: entry.method.clone(),
            path: entry.path.clone(),
            status: entry.status,
            latency_ms: entry.latency_ms,
            user_agent: entry.user_agent.clone(),
            created_at: now,
        };
        state.logs.push(log.clone());
        Ok(log)
    }

    async fn list_logs(&self, filter: &LogFilter) -> IamResult<Page<OperationLog>> {
        let state = self.read();
        let matching: Vec<&OperationLog> = state
            .logs
            .iter()
            .rev()
            .filter(|log| filter.matches(log))
            .collect();

        let items = matching
            .iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .map(|log| (*log).clone())
            .collect();

        Ok(Page {
            items,
            total: matching.len() as i64,
            page: filter.page.max(1),
            page_size: filter.limit() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PermissionKind;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            password_hash: "hash".to_string(),
            nickname: String::new(),
            email: String::new(),
            phone: String::new(),
            avatar: String::new(),
            status: UserStatus::Active,
            role_id: None,
        }
    }

    #[tokio::test]
    async fn test_live_usernames_are_unique() {
        let store = InMemoryStore::new();
        let alice = store.create(&new_user("alice")).await.unwrap();

        let duplicate = store.create(&new_user("alice")).await;
        assert!(matches!(duplicate, Err(IamError::Conflict(_))));

        store.soft_delete(alice.id).await.unwrap();
        let reused = store.create(&new_user("alice")).await.unwrap();
        assert_ne!(reused.id, alice.id);

        // The tombstoned original can no longer come back under the same name.
        assert!(matches!(
            store.restore(alice.id).await,
            Err(IamError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_role_detaches_users_and_assignments() {
        let store = InMemoryStore::new();
        let role = store.create_role(&NewRole::new("Ops", "ops")).await.unwrap();
        let permission = store
            .create_permission(&NewPermission::new(
                "List users",
                "system:user:list",
                PermissionKind::Button,
            ))
            .await
            .unwrap();
        store
            .replace_role_permissions(role.id, &[permission.id])
            .await
            .unwrap();
        let user = store.create(&new_user("bob")).await.unwrap();
        UserDirectory::update_role(&store, user.id, Some(role.id)).await.unwrap();

        store.delete_role(role.id).await.unwrap();

        let user = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.role_id, None);
        assert!(store.role_permissions(role.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_role_chain_respects_depth_cap() {
        let store = InMemoryStore::new().with_max_role_depth(2);
        let root = store.create_role(&NewRole::new("Root", "root")).await.unwrap();
        let mut middle = NewRole::new("Middle", "middle");
        middle.parent_id = Some(root.id);
        let middle = store.create_role(&middle).await.unwrap();
        let mut leaf = NewRole::new("Leaf", "leaf");
        leaf.parent_id = Some(middle.id);
        let leaf = store.create_role(&leaf).await.unwrap();

        let permission = store
            .create_permission(&NewPermission::new("Audit", "system:audit", PermissionKind::Data))
            .await
            .unwrap();
        store
            .replace_role_permissions(root.id, &[permission.id])
            .await
            .unwrap();

        let user = store.create(&new_user("carol")).await.unwrap();
        UserDirectory::update_role(&store, user.id, Some(leaf.id)).await.unwrap();

        assert!(!store.has_permission(user.id, "system:audit").await.unwrap());
        UserDirectory::update_role(&store, user.id, Some(middle.id)).await.unwrap();
        assert!(store.has_permission(user.id, "system:audit").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_with_unknown_permission_keeps_previous_set() {
        let store = InMemoryStore::new();
        let role = store.create_role(&NewRole::new("Ops", "ops")).await.unwrap();
        let permission = store
            .create_permission(&NewPermission::new("Menu", "system:menu", PermissionKind::Menu))
            .await
            .unwrap();
        store
            .replace_role_permissions(role.id, &[permission.id])
            .await
            .unwrap();

        let result = store
            .replace_role_permissions(role.id, &[permission.id, 999])
            .await;
        assert!(matches!(result, Err(IamError::Transaction(_))));

        let kept = store.role_permissions(role.id).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, permission.id);
    }

    fn log_entry(user_id: Option<i64>, path: &str) -> NewOperationLog {
        NewOperationLog {
            user_id,
            ip: "10.0.0.1".to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            status: 200,
            latency_ms: 3,
            user_agent: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_operation_logs_newest_first_and_filtered() {
        let store = InMemoryStore::new();
        store.record(&log_entry(None, "/health")).await.unwrap();
        store.record(&log_entry(Some(7), "/auth/me")).await.unwrap();
        store.record(&log_entry(Some(8), "/users")).await.unwrap();
        store.record(&log_entry(Some(7), "/auth/permissions")).await.unwrap();

        let page = store
            .list_logs(&LogFilter {
                page: 1,
                page_size: 2,
                user_id: None,
            })
            .await
            .unwrap();
        assert_eq!(page.total, 4);
        let paths: Vec<&str> = page.items.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["/auth/permissions", "/users"]);

        let mine = store
            .list_logs(&LogFilter {
                user_id: Some(7),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(mine.total, 2);
        assert!(mine.items.iter().all(|l| l.user_id == Some(7)));
    }
}
