//! Operation log model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One handled HTTP request, as recorded by the operation log middleware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OperationLog {
    pub id: i64,
    /// Authenticated caller, if the route required a token
    pub user_id: Option<i64>,
    pub ip: String,
    pub method: String,
    pub path: String,
    pub status: i32,
    pub latency_ms: i64,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

/// Operation log entry waiting to be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperationLog {
    pub user_id: Option<i64>,
    pub ip: String,
    pub method: String,
    pub path: String,
    pub status: i32,
    pub latency_ms: i64,
    pub user_agent: String,
}

/// Listing filter for operation logs, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFilter {
    pub page: u32,
    pub page_size: u32,
    pub user_id: Option<i64>,
}

impl LogFilter {
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size.clamp(1, Self::MAX_PAGE_SIZE))
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * self.limit()
    }

    pub(crate) fn matches(&self, log: &OperationLog) -> bool {
        self.user_id.is_none_or(|user_id| log.user_id == Some(user_id))
    }
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            user_id: None,
        }
    }
}
