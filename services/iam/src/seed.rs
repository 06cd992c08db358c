//! Base roles, permissions and the bootstrap administrator
//!
//! Seeding only creates what is missing. Roles and permissions that already
//! exist keep any edits an operator made, and an existing administrator keeps
//! its password. Running it again is a no-op.

use std::collections::{BTreeSet, HashMap};

use tracing::{info, instrument};

use crate::accounts::{AccountService, DEFAULT_ROLE_CODE, NewAccount};
use crate::error::{IamError, IamResult};
use crate::models::{NewPermission, NewRole, Permission, PermissionKind, Role};
use crate::repositories::PermissionGraph;

pub const SUPER_ADMIN_ROLE_CODE: &str = "super_admin";
pub const ADMIN_ROLE_CODE: &str = "admin";

struct RoleSeed {
    code: &'static str,
    name: &'static str,
    description: &'static str,
}

const BASE_ROLES: &[RoleSeed] = &[
    RoleSeed {
        code: SUPER_ADMIN_ROLE_CODE,
        name: "Super administrator",
        description: "Holds every base permission",
    },
    RoleSeed {
        code: ADMIN_ROLE_CODE,
        name: "Administrator",
        description: "Day-to-day administration",
    },
    RoleSeed {
        code: DEFAULT_ROLE_CODE,
        name: "Regular user",
        description: "Assigned to accounts created without a role",
    },
];

struct PermissionSeed {
    code: &'static str,
    name: &'static str,
    kind: PermissionKind,
    /// Menu this entry hangs under; always listed before it
    parent: Option<&'static str>,
}

const fn menu(code: &'static str, name: &'static str) -> PermissionSeed {
    PermissionSeed {
        code,
        name,
        kind: PermissionKind::Menu,
        parent: None,
    }
}

const fn button(code: &'static str, name: &'static str, parent: &'static str) -> PermissionSeed {
    PermissionSeed {
        code,
        name,
        kind: PermissionKind::Button,
        parent: Some(parent),
    }
}

const BASE_PERMISSIONS: &[PermissionSeed] = &[
    menu("system:user", "User management"),
    button("system:user:list", "List users", "system:user"),
    button("system:user:create", "Create users", "system:user"),
    button("system:user:update", "Update users", "system:user"),
    button("system:user:delete", "Delete users", "system:user"),
    button("system:user:export", "Export users", "system:user"),
    button("system:user:import", "Import users", "system:user"),
    menu("system:permission", "Permission management"),
    button("system:permission:list", "List permissions", "system:permission"),
    button("system:permission:create", "Create permissions", "system:permission"),
    button("system:permission:update", "Update permissions", "system:permission"),
    button("system:permission:delete", "Delete permissions", "system:permission"),
    menu("system:role", "Role management"),
    button("system:role:list", "List roles", "system:role"),
    button("system:role:create", "Create roles", "system:role"),
    button("system:role:update", "Update roles", "system:role"),
    button("system:role:delete", "Delete roles", "system:role"),
    button("system:role:assign", "Assign permissions", "system:role"),
    menu("system:log", "Operation logs"),
    button("system:log:list", "List operation logs", "system:log"),
];

/// Credentials of the administrator created on first start
#[derive(Clone)]
pub struct AdminSeed {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// What a seeding run had to create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub roles_created: usize,
    pub permissions_created: usize,
    pub assignments_added: usize,
    pub admin_created: bool,
}

/// Create the base roles and permissions, give the super administrator
/// every base permission, and create the administrator account if asked to.
#[instrument(skip(accounts, admin), err)]
pub async fn seed_base_data(
    accounts: &AccountService,
    admin: Option<&AdminSeed>,
) -> IamResult<SeedReport> {
    let graph = accounts.graph().as_ref();
    let mut report = SeedReport::default();

    let mut roles = HashMap::new();
    for seed in BASE_ROLES {
        let (role, created) = ensure_role(graph, seed).await?;
        report.roles_created += usize::from(created);
        roles.insert(seed.code, role);
    }

    let mut permission_ids: HashMap<&str, i64> = HashMap::new();
    for seed in BASE_PERMISSIONS {
        let parent_id = seed.parent.and_then(|code| permission_ids.get(code).copied());
        let (permission, created) = ensure_permission(graph, seed, parent_id).await?;
        report.permissions_created += usize::from(created);
        permission_ids.insert(seed.code, permission.id);
    }

    let super_admin = roles
        .get(SUPER_ADMIN_ROLE_CODE)
        .ok_or_else(|| IamError::not_found(format!("role '{}'", SUPER_ADMIN_ROLE_CODE)))?;
    let held: BTreeSet<i64> = graph
        .role_permissions(super_admin.id)
        .await?
        .iter()
        .map(|p| p.id)
        .collect();
    let seeded: BTreeSet<i64> = permission_ids.values().copied().collect();
    let missing = seeded.difference(&held).count();
    if missing > 0 {
        let ids: Vec<i64> = held.union(&seeded).copied().collect();
        graph.replace_role_permissions(super_admin.id, &ids).await?;
        report.assignments_added = missing;
    }

    if let Some(admin) = admin {
        let existing = accounts
            .users()
            .directory()
            .find_by_username(&admin.username)
            .await?;
        if existing.is_none() {
            let account = NewAccount {
                nickname: "Administrator".to_string(),
                role_id: Some(super_admin.id),
                ..NewAccount::new(admin.username.clone(), admin.password.clone())
            };
            let user = accounts.create_user(&account).await?;
            info!("Created bootstrap administrator {} ({})", user.id, user.username);
            report.admin_created = true;
        }
    }

    info!(
        "Base data seeded: {} roles, {} permissions, {} assignments created",
        report.roles_created, report.permissions_created, report.assignments_added
    );
    Ok(report)
}

async fn ensure_role(graph: &dyn PermissionGraph, seed: &RoleSeed) -> IamResult<(Role, bool)> {
    if let Some(role) = graph.find_role_by_code(seed.code).await? {
        return Ok((role, false));
    }

    let mut new_role = NewRole::new(seed.name, seed.code);
    new_role.description = seed.description.to_string();
    new_role.sort = BASE_ROLES
        .iter()
        .position(|r| r.code == seed.code)
        .map_or(0, |i| i as i32 + 1);
    match graph.create_role(&new_role).await {
        Ok(role) => Ok((role, true)),
        // Another instance seeded it first.
        Err(IamError::Conflict(_)) => graph
            .find_role_by_code(seed.code)
            .await?
            .map(|role| (role, false))
            .ok_or_else(|| IamError::not_found(format!("role '{}'", seed.code))),
        Err(e) => Err(e),
    }
}

async fn ensure_permission(
    graph: &dyn PermissionGraph,
    seed: &PermissionSeed,
    parent_id: Option<i64>,
) -> IamResult<(Permission, bool)> {
    if let Some(permission) = find_permission(graph, seed.code).await? {
        return Ok((permission, false));
    }

    let mut new_permission = NewPermission::new(seed.name, seed.code, seed.kind);
    new_permission.parent_id = parent_id;
    new_permission.sort = BASE_PERMISSIONS
        .iter()
        .position(|p| p.code == seed.code)
        .map_or(0, |i| i as i32 + 1);
    match graph.create_permission(&new_permission).await {
        Ok(permission) => Ok((permission, true)),
        Err(IamError::Conflict(_)) => find_permission(graph, seed.code)
            .await?
            .map(|permission| (permission, false))
            .ok_or_else(|| IamError::not_found(format!("permission '{}'", seed.code))),
        Err(e) => Err(e),
    }
}

async fn find_permission(graph: &dyn PermissionGraph, code: &str) -> IamResult<Option<Permission>> {
    Ok(graph
        .list_permissions()
        .await?
        .into_iter()
        .find(|permission| permission.code == code))
}
