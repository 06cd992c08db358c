//! Role and permission repository for database operations
//!
//! Permission derivation runs as a single recursive query: it starts at the
//! user's role, climbs `roles.parent_id` while the parent is active, has not
//! been visited on the current path and the chain is shorter than the depth
//! cap, then joins the collected roles against their active permissions.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info, instrument};

use crate::error::{IamError, IamResult, map_sqlx_error};
use crate::models::{
    NewPermission, NewRole, Permission, RecordStatus, Role, UpdatePermission, UpdateRole,
};
use crate::repositories::{DEFAULT_MAX_ROLE_DEPTH, PermissionGraph};

const ROLE_COLUMNS: &str =
    "id, name, code, description, parent_id, data_scope, sort, status, created_at, updated_at";

const PERMISSION_COLUMNS: &str =
    "p.id, p.name, p.code, p.kind, p.parent_id, p.sort, p.status, p.meta, p.created_at, p.updated_at";

/// Roles reachable from user `$1`, at most `$2` deep.
const ROLE_CHAIN_CTE: &str = r#"
    WITH RECURSIVE chain (role_id, depth, path) AS (
        SELECT r.id, 1, ARRAY[r.id]
        FROM users u
        JOIN roles r ON r.id = u.role_id
        WHERE u.id = $1 AND u.deleted_at IS NULL AND r.status = 1
      UNION ALL
        SELECT parent.id, c.depth + 1, c.path || parent.id
        FROM chain c
        JOIN roles r ON r.id = c.role_id
        JOIN roles parent ON parent.id = r.parent_id
        WHERE parent.status = 1
          AND NOT parent.id = ANY (c.path)
          AND c.depth < $2
    )
"#;

/// PostgreSQL-backed permission graph
#[derive(Clone)]
pub struct PgPermissionGraph {
    pool: PgPool,
    max_role_depth: u32,
}

impl PgPermissionGraph {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_role_depth: DEFAULT_MAX_ROLE_DEPTH,
        }
    }

    pub fn with_max_role_depth(mut self, depth: u32) -> Self {
        self.max_role_depth = depth.max(1);
        self
    }

    fn depth_param(&self) -> i32 {
        i32::try_from(self.max_role_depth).unwrap_or(i32::MAX)
    }

    /// Whether `candidate_parent` is `role_id` or one of its descendants.
    async fn would_cycle(&self, role_id: i64, candidate_parent: i64) -> IamResult<bool> {
        if role_id == candidate_parent {
            return Ok(true);
        }

        sqlx::query_scalar::<_, bool>(
            r#"
            WITH RECURSIVE ancestors (id, path) AS (
                SELECT id, ARRAY[id] FROM roles WHERE id = $1
              UNION ALL
                SELECT r.parent_id, a.path || r.parent_id
                FROM ancestors a
                JOIN roles r ON r.id = a.id
                WHERE r.parent_id IS NOT NULL AND NOT r.parent_id = ANY (a.path)
            )
            SELECT EXISTS (SELECT 1 FROM ancestors WHERE id = $2)
            "#,
        )
        .bind(candidate_parent)
        .bind(role_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("check role hierarchy", e))
    }

    async fn replace_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        role_id: i64,
        permission_ids: &[i64],
    ) -> Result<bool, sqlx::Error> {
        // Row lock serializes concurrent replacements of the same role.
        let locked = sqlx::query_scalar::<_, i64>("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(role_id)
            .fetch_optional(&mut **tx)
            .await?;
        if locked.is_none() {
            return Ok(false);
        }

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut **tx)
            .await?;

        if !permission_ids.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO role_permissions (role_id, permission_id)
                SELECT $1, pid FROM UNNEST($2::BIGINT[]) AS pid
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(role_id)
            .bind(permission_ids)
            .execute(&mut **tx)
            .await?;
        }

        Ok(true)
    }
}

fn role_not_found(id: i64) -> IamError {
    IamError::not_found(format!("role {}", id))
}

fn permission_not_found(id: i64) -> IamError {
    IamError::not_found(format!("permission {}", id))
}

#[async_trait]
impl PermissionGraph for PgPermissionGraph {
    #[instrument(skip(self, role), fields(code = %role.code), err)]
    async fn create_role(&self, role: &NewRole) -> IamResult<Role> {
        info!("Creating role: {}", role.code);

        if let Some(parent_id) = role.parent_id {
            self.find_role(parent_id)
                .await?
                .ok_or_else(|| role_not_found(parent_id))?;
        }

        let sql = format!(
            r#"
            INSERT INTO roles (name, code, description, parent_id, data_scope, sort, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ROLE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Role>(&sql)
            .bind(&role.name)
            .bind(&role.code)
            .bind(&role.description)
            .bind(role.parent_id)
            .bind(&role.data_scope)
            .bind(role.sort)
            .bind(role.status)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create role", e))
    }

    #[instrument(skip(self, update), err)]
    async fn update_role(&self, id: i64, update: &UpdateRole) -> IamResult<Role> {
        let mut role = self.find_role(id).await?.ok_or_else(|| role_not_found(id))?;

        if let Some(Some(parent_id)) = update.parent_id {
            self.find_role(parent_id)
                .await?
                .ok_or_else(|| role_not_found(parent_id))?;
            if self.would_cycle(id, parent_id).await? {
                return Err(IamError::Conflict(format!(
                    "role {} cannot inherit from role {}: it would form a cycle",
                    id, parent_id
                )));
            }
        }

        update.apply(&mut role);

        let sql = format!(
            r#"
            UPDATE roles
            SET name = $2, code = $3, description = $4, parent_id = $5,
                data_scope = $6, sort = $7, status = $8, updated_at = now()
            WHERE id = $1
            RETURNING {ROLE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Role>(&sql)
            .bind(id)
            .bind(&role.name)
            .bind(&role.code)
            .bind(&role.description)
            .bind(role.parent_id)
            .bind(&role.data_scope)
            .bind(role.sort)
            .bind(role.status)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update role", e))?
            .ok_or_else(|| role_not_found(id))
    }

    #[instrument(skip(self), err)]
    async fn delete_role(&self, id: i64) -> IamResult<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete role", e))?;

        if result.rows_affected() == 0 {
            return Err(role_not_found(id));
        }
        Ok(())
    }

    async fn find_role(&self, id: i64) -> IamResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
        sqlx::query_as::<_, Role>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find role", e))
    }

    async fn find_role_by_code(&self, code: &str) -> IamResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE code = $1");
        sqlx::query_as::<_, Role>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find role by code", e))
    }

    async fn list_roles(&self) -> IamResult<Vec<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY sort ASC, id ASC");
        sqlx::query_as::<_, Role>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list roles", e))
    }

    #[instrument(skip(self, permission), fields(code = %permission.code), err)]
    async fn create_permission(&self, permission: &NewPermission) -> IamResult<Permission> {
        info!("Creating permission: {}", permission.code);

        let sql = format!(
            r#"
            INSERT INTO permissions AS p (name, code, kind, parent_id, sort, status, meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PERMISSION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Permission>(&sql)
            .bind(&permission.name)
            .bind(&permission.code)
            .bind(permission.kind.as_str())
            .bind(permission.parent_id)
            .bind(permission.sort)
            .bind(permission.status)
            .bind(sqlx::types::Json(&permission.meta))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create permission", e))
    }

    #[instrument(skip(self, update), err)]
    async fn update_permission(
        &self,
        id: i64,
        update: &UpdatePermission,
    ) -> IamResult<Permission> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE p.id = $1");
        let mut permission = sqlx::query_as::<_, Permission>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find permission", e))?
            .ok_or_else(|| permission_not_found(id))?;

        update.apply(&mut permission);

        let sql = format!(
            r#"
            UPDATE permissions AS p
            SET name = $2, code = $3, kind = $4, parent_id = $5, sort = $6,
                status = $7, meta = $8, updated_at = now()
            WHERE p.id = $1
            RETURNING {PERMISSION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Permission>(&sql)
            .bind(id)
            .bind(&permission.name)
            .bind(&permission.code)
            .bind(permission.kind.as_str())
            .bind(permission.parent_id)
            .bind(permission.sort)
            .bind(permission.status)
            .bind(sqlx::types::Json(&permission.meta))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update permission", e))?
            .ok_or_else(|| permission_not_found(id))
    }

    #[instrument(skip(self), err)]
    async fn set_permission_status(
        &self,
        id: i64,
        status: RecordStatus,
    ) -> IamResult<Permission> {
        let sql = format!(
            r#"
            UPDATE permissions AS p SET status = $2, updated_at = now()
            WHERE p.id = $1
            RETURNING {PERMISSION_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Permission>(&sql)
            .bind(id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set permission status", e))?
            .ok_or_else(|| permission_not_found(id))
    }

    #[instrument(skip(self), err)]
    async fn delete_permission(&self, id: i64) -> IamResult<()> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete permission", e))?;

        if result.rows_affected() == 0 {
            return Err(permission_not_found(id));
        }
        Ok(())
    }

    async fn list_permissions(&self) -> IamResult<Vec<Permission>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions p ORDER BY p.sort, p.id");
        sqlx::query_as::<_, Permission>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list permissions", e))
    }

    async fn role_permissions(&self, role_id: i64) -> IamResult<Vec<Permission>> {
        let sql = format!(
            r#"
            SELECT {PERMISSION_COLUMNS}
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.sort, p.id
            "#
        );
        sqlx::query_as::<_, Permission>(&sql)
            .bind(role_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list role permissions", e))
    }

    #[instrument(skip(self, permission_ids), fields(count = permission_ids.len()), err)]
    async fn replace_role_permissions(
        &self,
        role_id: i64,
        permission_ids: &[i64],
    ) -> IamResult<()> {
        let mut ids = permission_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to open assignment transaction: {}", e);
            IamError::Transaction(e.to_string())
        })?;

        match Self::replace_in_tx(&mut tx, role_id, &ids).await {
            Ok(true) => {}
            Ok(false) => {
                // Dropping the transaction rolls it back.
                return Err(role_not_found(role_id));
            }
            Err(e) => {
                error!("Role {} assignment replacement aborted: {}", role_id, e);
                return Err(IamError::Transaction(e.to_string()));
            }
        }

        tx.commit().await.map_err(|e| {
            error!("Role {} assignment commit failed: {}", role_id, e);
            IamError::Transaction(e.to_string())
        })?;

        info!(
            "Replaced permissions of role {} with {} entries",
            role_id,
            ids.len()
        );
        Ok(())
    }

    async fn permissions_of_user(&self, user_id: i64) -> IamResult<Vec<Permission>> {
        let sql = format!(
            r#"
            {ROLE_CHAIN_CTE}
            SELECT {PERMISSION_COLUMNS}
            FROM permissions p
            WHERE p.status = 1
              AND p.id IN (
                  SELECT rp.permission_id
                  FROM role_permissions rp
                  JOIN chain c ON c.role_id = rp.role_id
              )
            ORDER BY p.sort, p.id
            "#
        );
        sqlx::query_as::<_, Permission>(&sql)
            .bind(user_id)
            .bind(self.depth_param())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("derive user permissions", e))
    }

    async fn has_permission(&self, user_id: i64, code: &str) -> IamResult<bool> {
        let sql = format!(
            r#"
            {ROLE_CHAIN_CTE}
            SELECT EXISTS (
                SELECT 1
                FROM permissions p
                JOIN role_permissions rp ON rp.permission_id = p.id
                JOIN chain c ON c.role_id = rp.role_id
                WHERE p.code = $3 AND p.status = 1
            )
            "#
        );
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(user_id)
            .bind(self.depth_param())
            .bind(code)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("check user permission", e))
    }
}
