//! Operation log repository for database operations

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use crate::error::{IamResult, map_sqlx_error};
use crate::models::{LogFilter, NewOperationLog, OperationLog, Page};
use crate::repositories::OperationLogStore;

const LOG_COLUMNS: &str =
    "id, user_id, ip, method, path, status, latency_ms, user_agent, created_at";

/// PostgreSQL-backed operation log
#[derive(Clone)]
pub struct PgOperationLogStore {
    pool: PgPool,
}

impl PgOperationLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OperationLogStore for PgOperationLogStore {
    #[instrument(skip(self, entry), fields(path = %entry.path), err)]
    async fn record(&self, entry: &NewOperationLog) -> IamResult<OperationLog> {
        let sql = format!(
            r#"
            INSERT INTO operation_logs (user_id, ip, method, path, status, latency_ms, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {LOG_COLUMNS}
            "#
        );
        sqlx::query_as::<_, OperationLog>(&sql)
            .bind(entry.user_id)
            .bind(&entry.ip)
            .bind(&entry.method)
            .bind(&entry.path)
            .bind(entry.status)
            .bind(entry.latency_ms)
            .bind(&entry.user_agent)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("record operation log", e))
    }

    async fn list_logs(&self, filter: &LogFilter) -> IamResult<Page<OperationLog>> {
        let predicate = "($1::BIGINT IS NULL OR user_id = $1)";

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM operation_logs WHERE {predicate}"
        ))
        .bind(filter.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count operation logs", e))?;

        let page_sql = format!(
            "SELECT {LOG_COLUMNS} FROM operation_logs WHERE {predicate} \
             ORDER BY id DESC LIMIT $2 OFFSET $3"
        );
        let items = sqlx::query_as::<_, OperationLog>(&page_sql)
            .bind(filter.user_id)
            .bind(filter.limit())
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list operation logs", e))?;

        Ok(Page {
            items,
            total,
            page: filter.page.max(1),
            page_size: filter.limit() as u32,
        })
    }
}
