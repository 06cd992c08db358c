//! Permission model

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

use crate::models::RecordStatus;

/// What a permission guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    Menu,
    Button,
    Data,
}

impl PermissionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionKind::Menu => "menu",
            PermissionKind::Button => "button",
            PermissionKind::Data => "data",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown permission kind '{0}'")]
pub struct UnknownPermissionKind(String);

impl FromStr for PermissionKind {
    type Err = UnknownPermissionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "menu" => Ok(PermissionKind::Menu),
            "button" => Ok(PermissionKind::Button),
            "data" => Ok(PermissionKind::Data),
            other => Err(UnknownPermissionKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for PermissionKind {
    type Error = UnknownPermissionKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Presentation metadata for menu rendering. Opaque to authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PermissionMeta {
    pub path: String,
    pub component: String,
    pub redirect: String,
    pub icon: String,
    pub hidden: bool,
    pub description: String,
}

/// Permission entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: i64,
    pub name: String,
    pub code: String,
    #[sqlx(try_from = "String")]
    pub kind: PermissionKind,
    pub parent_id: Option<i64>,
    pub sort: i32,
    pub status: RecordStatus,
    #[sqlx(json)]
    pub meta: PermissionMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New permission creation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPermission {
    pub name: String,
    pub code: String,
    pub kind: PermissionKind,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub sort: i32,
    #[serde(default = "active")]
    pub status: RecordStatus,
    #[serde(default)]
    pub meta: PermissionMeta,
}

impl NewPermission {
    pub fn new(name: impl Into<String>, code: impl Into<String>, kind: PermissionKind) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            kind,
            parent_id: None,
            sort: 0,
            status: RecordStatus::Active,
            meta: PermissionMeta::default(),
        }
    }
}

fn active() -> RecordStatus {
    RecordStatus::Active
}

/// Permission update payload; `None` leaves a field untouched
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdatePermission {
    pub name: Option<String>,
    pub code: Option<String>,
    pub kind: Option<PermissionKind>,
    pub parent_id: Option<Option<i64>>,
    pub sort: Option<i32>,
    pub status: Option<RecordStatus>,
    pub meta: Option<PermissionMeta>,
}

impl UpdatePermission {
    pub(crate) fn apply(&self, permission: &mut Permission) {
        if let Some(name) = &self.name {
            permission.name = name.clone();
        }
        if let Some(code) = &self.code {
            permission.code = code.clone();
        }
        if let Some(kind) = self.kind {
            permission.kind = kind;
        }
        if let Some(parent_id) = self.parent_id {
            permission.parent_id = parent_id;
        }
        if let Some(sort) = self.sort {
            permission.sort = sort;
        }
        if let Some(status) = self.status {
            permission.status = status;
        }
        if let Some(meta) = &self.meta {
            permission.meta = meta.clone();
        }
    }
}
