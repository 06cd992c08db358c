//! Role model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Enabled/disabled flag shared by roles and permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum RecordStatus {
    Disabled = 0,
    Active = 1,
}

impl RecordStatus {
    pub fn is_active(self) -> bool {
        self == RecordStatus::Active
    }
}

/// Role entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: String,
    /// Parent role whose permissions this role inherits
    pub parent_id: Option<i64>,
    /// Row-visibility tag, interpreted by query filters outside this crate
    pub data_scope: Option<String>,
    pub sort: i32,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New role creation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub data_scope: Option<String>,
    #[serde(default)]
    pub sort: i32,
    #[serde(default = "active")]
    pub status: RecordStatus,
}

impl NewRole {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            description: String::new(),
            parent_id: None,
            data_scope: None,
            sort: 0,
            status: RecordStatus::Active,
        }
    }
}

fn active() -> RecordStatus {
    RecordStatus::Active
}

/// Role update payload; `None` leaves a field untouched.
///
/// `parent_id` and `data_scope` are doubly optional: `Some(None)` clears them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateRole {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<Option<i64>>,
    pub data_scope: Option<Option<String>>,
    pub sort: Option<i32>,
    pub status: Option<RecordStatus>,
}

impl UpdateRole {
    pub(crate) fn apply(&self, role: &mut Role) {
        if let Some(name) = &self.name {
            role.name = name.clone();
        }
        if let Some(code) = &self.code {
            role.code = code.clone();
        }
        if let Some(description) = &self.description {
            role.description = description.clone();
        }
        if let Some(parent_id) = self.parent_id {
            role.parent_id = parent_id;
        }
        if let Some(data_scope) = &self.data_scope {
            role.data_scope = data_scope.clone();
        }
        if let Some(sort) = self.sort {
            role.sort = sort;
        }
        if let Some(status) = self.status {
            role.status = status;
        }
    }
}
