//! User model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{IamError, IamResult};
use crate::models::Role;

/// Account status, persisted as SMALLINT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum UserStatus {
    Disabled = 0,
    Active = 1,
    Frozen = 2,
    PendingReview = 3,
}

impl UserStatus {
    /// Reject every state that must not receive a session.
    pub fn ensure_can_sign_in(self) -> IamResult<()> {
        match self {
            UserStatus::Active => Ok(()),
            UserStatus::Disabled => Err(IamError::AccountDisabled),
            UserStatus::Frozen => Err(IamError::AccountFrozen),
            UserStatus::PendingReview => Err(IamError::AccountPendingReview),
        }
    }
}

/// User entity.
///
/// Carries no credential: the password hash only leaves the store through
/// [`UserCredential`], so a `User` is safe to cache and to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub nickname: String,
    pub email: String,
    pub phone: String,
    pub avatar: String,
    pub status: UserStatus,
    pub role_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Password hash and sign-in relevant state, read fresh from the store
#[derive(Clone, PartialEq, Eq, FromRow)]
pub struct UserCredential {
    pub user_id: i64,
    pub password_hash: String,
    pub status: UserStatus,
}

impl std::fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredential")
            .field("user_id", &self.user_id)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// New user creation payload
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub nickname: String,
    pub email: String,
    pub phone: String,
    pub avatar: String,
    pub status: UserStatus,
    pub role_id: Option<i64>,
}

/// Profile update payload; `None` leaves a field untouched
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileUpdate {
    pub(crate) fn apply(&self, user: &mut User) {
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(nickname) = &self.nickname {
            user.nickname = nickname.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(phone) = &self.phone {
            user.phone = phone.clone();
        }
        if let Some(avatar) = &self.avatar {
            user.avatar = avatar.clone();
        }
    }
}

/// Listing filter for the user directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFilter {
    pub page: u32,
    pub page_size: u32,
    /// Exact username, or a substring of nickname/email
    pub keyword: Option<String>,
    pub status: Option<UserStatus>,
}

impl UserFilter {
    pub const MAX_PAGE_SIZE: u32 = 200;

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size.clamp(1, Self::MAX_PAGE_SIZE))
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * self.limit()
    }

    pub(crate) fn matches(&self, user: &User) -> bool {
        if let Some(status) = self.status {
            if user.status != status {
                return false;
            }
        }
        match self.keyword.as_deref() {
            None | Some("") => true,
            Some(keyword) => {
                user.username == keyword
                    || user.nickname.contains(keyword)
                    || user.email.contains(keyword)
            }
        }
    }
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            keyword: None,
            status: None,
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// User with its role attached, as returned by login
#[derive(Debug, Clone, Serialize)]
pub struct UserWithRole {
    #[serde(flatten)]
    pub user: User,
    pub role: Option<Role>,
}
