//! Account administration
//!
//! Every operation that writes a user through the directory invalidates that
//! user's cache entry afterwards, under both its previous and its new
//! username.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::cache::CachedDirectory;
use crate::credential::CredentialVerifier;
use crate::error::{IamError, IamResult};
use crate::models::{
    NewRole, NewUser, Page, ProfileUpdate, Role, User, UserFilter, UserStatus, UserWithRole,
};
use crate::repositories::PermissionGraph;
use crate::validation::{
    validate_email, validate_password, validate_phone, validate_profile_update,
    validate_username,
};

/// Role given to accounts created without an explicit one
pub const DEFAULT_ROLE_CODE: &str = "user";

/// Plaintext account details, as received from registration or an admin
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub nickname: String,
    pub email: String,
    pub phone: String,
    pub avatar: String,
    pub role_id: Option<i64>,
}

impl NewAccount {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    fn validate(&self) -> IamResult<()> {
        validate_username(&self.username)?;
        validate_password(&self.password)?;
        validate_email(&self.email)?;
        validate_phone(&self.phone)
    }
}

#[derive(Clone)]
pub struct AccountService {
    users: CachedDirectory,
    graph: Arc<dyn PermissionGraph>,
    verifier: CredentialVerifier,
    default_role_code: String,
}

impl AccountService {
    pub fn new(
        users: CachedDirectory,
        graph: Arc<dyn PermissionGraph>,
        verifier: CredentialVerifier,
    ) -> Self {
        Self {
            users,
            graph,
            verifier,
            default_role_code: DEFAULT_ROLE_CODE.to_string(),
        }
    }

    pub fn with_default_role_code(mut self, code: impl Into<String>) -> Self {
        self.default_role_code = code.into();
        self
    }

    pub fn users(&self) -> &CachedDirectory {
        &self.users
    }

    pub fn graph(&self) -> &Arc<dyn PermissionGraph> {
        &self.graph
    }

    /// The default role, created on first use.
    async fn default_role(&self) -> IamResult<Role> {
        if let Some(role) = self.graph.find_role_by_code(&self.default_role_code).await? {
            return Ok(role);
        }

        info!("Creating missing default role '{}'", self.default_role_code);
        let mut new_role = NewRole::new("Regular user", self.default_role_code.clone());
        new_role.description = "Assigned to accounts created without a role".to_string();
        match self.graph.create_role(&new_role).await {
            Ok(role) => Ok(role),
            Err(IamError::Conflict(_)) => self
                .graph
                .find_role_by_code(&self.default_role_code)
                .await?
                .ok_or_else(|| IamError::not_found(format!("role '{}'", self.default_role_code))),
            Err(e) => Err(e),
        }
    }

    /// Create an active account. Without a role it gets the default role.
    #[instrument(skip(self, account), fields(username = %account.username), err)]
    pub async fn create_user(&self, account: &NewAccount) -> IamResult<User> {
        account.validate()?;

        let role_id = match account.role_id {
            Some(role_id) => {
                self.graph
                    .find_role(role_id)
                    .await?
                    .ok_or_else(|| IamError::not_found(format!("role {}", role_id)))?
                    .id
            }
            None => self.default_role().await?.id,
        };

        if self
            .users
            .directory()
            .find_by_username(&account.username)
            .await?
            .is_some()
        {
            return Err(IamError::Conflict(format!(
                "username '{}' is already taken",
                account.username
            )));
        }

        let new_user = NewUser {
            username: account.username.clone(),
            password_hash: self.verifier.hash(&account.password)?,
            nickname: account.nickname.clone(),
            email: account.email.clone(),
            phone: account.phone.clone(),
            avatar: account.avatar.clone(),
            status: UserStatus::Active,
            role_id: Some(role_id),
        };
        let user = self.users.directory().create(&new_user).await?;
        info!("Created user {} ({})", user.id, user.username);
        Ok(user)
    }

    pub async fn get_user(&self, id: i64) -> IamResult<User> {
        self.users
            .user_by_id(id)
            .await?
            .ok_or_else(|| IamError::not_found(format!("user {}", id)))
    }

    /// User plus its role, the role read straight from the graph.
    pub async fn get_user_with_role(&self, id: i64) -> IamResult<UserWithRole> {
        let user = self.get_user(id).await?;
        self.attach_role(user).await
    }

    pub(crate) async fn attach_role(&self, user: User) -> IamResult<UserWithRole> {
        let role = match user.role_id {
            Some(role_id) => self.graph.find_role(role_id).await?,
            None => None,
        };
        Ok(UserWithRole { user, role })
    }

    pub async fn list_users(&self, filter: &UserFilter) -> IamResult<Page<User>> {
        self.users.directory().list_page(filter).await
    }

    #[instrument(skip(self, update), err)]
    pub async fn update_profile(&self, id: i64, update: &ProfileUpdate) -> IamResult<User> {
        validate_profile_update(update)?;

        let current = self
            .users
            .directory()
            .find_by_id(id)
            .await?
            .ok_or_else(|| IamError::not_found(format!("user {}", id)))?;

        if let Some(username) = update.username.as_deref() {
            if username != current.username {
                let holder = self.users.directory().find_by_username(username).await?;
                if holder.is_some_and(|holder| holder.id != id) {
                    return Err(IamError::Conflict(format!(
                        "username '{}' is already taken",
                        username
                    )));
                }
            }
        }

        let updated = self.users.directory().update(id, update).await?;
        self.users.invalidate(&current).await;
        if updated.username != current.username {
            self.users.invalidate(&updated).await;
        }
        Ok(updated)
    }

    #[instrument(skip(self), err)]
    pub async fn update_status(&self, id: i64, status: UserStatus) -> IamResult<User> {
        let user = self.users.directory().update_status(id, status).await?;
        self.users.invalidate(&user).await;
        info!("User {} status set to {:?}", id, status);
        Ok(user)
    }

    /// Point the user at `role_id`, or detach it from any role.
    #[instrument(skip(self), err)]
    pub async fn assign_role(&self, id: i64, role_id: Option<i64>) -> IamResult<User> {
        if let Some(role_id) = role_id {
            self.graph
                .find_role(role_id)
                .await?
                .ok_or_else(|| IamError::not_found(format!("role {}", role_id)))?;
        }

        let user = self.users.directory().update_role(id, role_id).await?;
        self.users.invalidate(&user).await;
        Ok(user)
    }

    /// Self-service password change; the old password is checked against
    /// the stored hash, never a cached copy.
    #[instrument(skip(self, old_password, new_password), err)]
    pub async fn change_password(
        &self,
        id: i64,
        old_password: &str,
        new_password: &str,
    ) -> IamResult<()> {
        validate_password(new_password)?;

        let credential = self
            .users
            .directory()
            .find_credential(id)
            .await?
            .ok_or_else(|| IamError::not_found(format!("user {}", id)))?;

        if !self.verifier.verify(old_password, &credential.password_hash) {
            warn!("Password change for user {} rejected: old password mismatch", id);
            return Err(IamError::InvalidCredentials);
        }

        let hash = self.verifier.hash(new_password)?;
        self.users.directory().set_password(id, &hash).await?;
        self.users.invalidate_by_id(id).await;
        info!("User {} changed their password", id);
        Ok(())
    }

    /// Administrative password reset
    #[instrument(skip(self, new_password), err)]
    pub async fn reset_password(&self, id: i64, new_password: &str) -> IamResult<()> {
        validate_password(new_password)?;

        let hash = self.verifier.hash(new_password)?;
        self.users.directory().set_password(id, &hash).await?;
        self.users.invalidate_by_id(id).await;
        info!("Password of user {} reset", id);
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn soft_delete(&self, id: i64) -> IamResult<User> {
        let user = self.users.directory().soft_delete(id).await?;
        self.users.invalidate(&user).await;
        info!("User {} soft-deleted", id);
        Ok(user)
    }

    #[instrument(skip(self), err)]
    pub async fn restore(&self, id: i64) -> IamResult<User> {
        let user = self.users.directory().restore(id).await?;
        self.users.invalidate(&user).await;
        info!("User {} restored", id);
        Ok(user)
    }
}
