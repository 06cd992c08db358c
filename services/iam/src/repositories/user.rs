//! User repository for database operations

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::error::{IamError, IamResult, map_sqlx_error};
use crate::models::{NewUser, Page, ProfileUpdate, User, UserCredential, UserFilter, UserStatus};
use crate::repositories::UserDirectory;

const USER_COLUMNS: &str = "id, username, nickname, email, phone, avatar, status, role_id, \
                            created_at, updated_at, deleted_at";

/// PostgreSQL-backed user directory
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    /// Create a new user directory
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_user(&self, operation: &str, sql: &str, id: i64) -> IamResult<Option<User>> {
        sqlx::query_as::<_, User>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

fn user_not_found(id: i64) -> IamError {
    IamError::not_found(format!("user {}", id))
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    #[instrument(skip(self, new_user), fields(username = %new_user.username), err)]
    async fn create(&self, new_user: &NewUser) -> IamResult<User> {
        info!("Creating new user: {}", new_user.username);

        let sql = format!(
            r#"
            INSERT INTO users (username, password_hash, nickname, email, phone, avatar, status, role_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&new_user.username)
            .bind(&new_user.password_hash)
            .bind(&new_user.nickname)
            .bind(&new_user.email)
            .bind(&new_user.phone)
            .bind(&new_user.avatar)
            .bind(new_user.status)
            .bind(new_user.role_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create user", e))
    }

    #[instrument(skip(self, update), err)]
    async fn update(&self, id: i64, update: &ProfileUpdate) -> IamResult<User> {
        let sql = format!(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                nickname = COALESCE($3, nickname),
                email = COALESCE($4, email),
                phone = COALESCE($5, phone),
                avatar = COALESCE($6, avatar),
                updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(update.username.as_deref())
            .bind(update.nickname.as_deref())
            .bind(update.email.as_deref())
            .bind(update.phone.as_deref())
            .bind(update.avatar.as_deref())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update user", e))?
            .ok_or_else(|| user_not_found(id))
    }

    #[instrument(skip(self), err)]
    async fn update_status(&self, id: i64, status: UserStatus) -> IamResult<User> {
        let sql = format!(
            r#"
            UPDATE users SET status = $2, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update user status", e))?
            .ok_or_else(|| user_not_found(id))
    }

    #[instrument(skip(self), err)]
    async fn update_role(&self, id: i64, role_id: Option<i64>) -> IamResult<User> {
        let sql = format!(
            r#"
            UPDATE users SET role_id = $2, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update user role", e))?
            .ok_or_else(|| user_not_found(id))
    }

    #[instrument(skip(self, password_hash), err)]
    async fn set_password(&self, id: i64, password_hash: &str) -> IamResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET password_hash = $2, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set password", e))?;

        if result.rows_affected() == 0 {
            return Err(user_not_found(id));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> IamResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        self.fetch_user("find user by id", &sql, id).await
    }

    async fn find_by_username(&self, username: &str) -> IamResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find user by username", e))
    }

    async fn find_any_by_id(&self, id: i64) -> IamResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.fetch_user("find user by id (including deleted)", &sql, id)
            .await
    }

    async fn find_credential(&self, id: i64) -> IamResult<Option<UserCredential>> {
        sqlx::query_as::<_, UserCredential>(
            r#"
            SELECT id AS user_id, password_hash, status
            FROM users
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find credential", e))
    }

    #[instrument(skip(self), err)]
    async fn list_page(&self, filter: &UserFilter) -> IamResult<Page<User>> {
        let keyword = filter.keyword.as_deref().filter(|k| !k.is_empty());
        let predicate = r#"
            deleted_at IS NULL
            AND ($1::SMALLINT IS NULL OR status = $1)
            AND ($2::TEXT IS NULL OR username = $2
                 OR nickname LIKE '%' || $2 || '%'
                 OR email LIKE '%' || $2 || '%')
        "#;

        let count_sql = format!("SELECT COUNT(*) FROM users WHERE {predicate}");
        let total = sqlx::query_scalar::<_, i64>(&count_sql)
            .bind(filter.status)
            .bind(keyword)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count users", e))?;

        let page_sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {predicate} ORDER BY id DESC LIMIT $3 OFFSET $4"
        );
        let items = sqlx::query_as::<_, User>(&page_sql)
            .bind(filter.status)
            .bind(keyword)
            .bind(filter.limit())
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list users", e))?;

        Ok(Page {
            items,
            total,
            page: filter.page.max(1),
            page_size: filter.limit() as u32,
        })
    }

    #[instrument(skip(self), err)]
    async fn soft_delete(&self, id: i64) -> IamResult<User> {
        let sql = format!(
            r#"
            UPDATE users SET deleted_at = now(), updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );
        self.fetch_user("soft delete user", &sql, id)
            .await?
            .ok_or_else(|| user_not_found(id))
    }

    #[instrument(skip(self), err)]
    async fn restore(&self, id: i64) -> IamResult<User> {
        let existing = self
            .find_any_by_id(id)
            .await?
            .ok_or_else(|| user_not_found(id))?;
        if !existing.is_deleted() {
            return Err(IamError::Conflict(format!("user {} is not deleted", id)));
        }

        let sql = format!(
            r#"
            UPDATE users SET deleted_at = NULL, updated_at = now()
            WHERE id = $1 AND deleted_at IS NOT NULL
            RETURNING {USER_COLUMNS}
            "#
        );
        self.fetch_user("restore user", &sql, id)
            .await?
            .ok_or_else(|| IamError::Conflict(format!("user {} was restored concurrently", id)))
    }
}
