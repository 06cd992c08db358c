//! Registration, login and token authentication
//!
//! Login moves through the stages of [`LoginStage`] and stops at the first
//! failing one. The username lookup may be answered by the cache, but the
//! status check and the password comparison always use a credential read
//! fresh from the directory, and only a user record re-read from the
//! directory after both pass is written back to the cache.

use std::fmt;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::accounts::{AccountService, NewAccount};
use crate::credential::CredentialVerifier;
use crate::error::{IamError, IamResult};
use crate::models::{Role, User, UserWithRole};
use crate::subject::AuthenticatedSubject;
use crate::token::{IssuedToken, TokenService};

/// Where a login attempt got to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    CredentialsReceived,
    IdentityResolved,
    StatusChecked,
    PasswordVerified,
    TokenIssued,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginStage::CredentialsReceived => "credentials-received",
            LoginStage::IdentityResolved => "identity-resolved",
            LoginStage::StatusChecked => "status-checked",
            LoginStage::PasswordVerified => "password-verified",
            LoginStage::TokenIssued => "token-issued",
        };
        f.write_str(name)
    }
}

/// Successful login
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub user: User,
    pub role: Option<Role>,
    pub token: IssuedToken,
}

#[derive(Clone)]
pub struct SessionFlow {
    accounts: AccountService,
    tokens: TokenService,
    verifier: CredentialVerifier,
}

impl SessionFlow {
    pub fn new(accounts: AccountService, tokens: TokenService, verifier: CredentialVerifier) -> Self {
        Self {
            accounts,
            tokens,
            verifier,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Self-service sign up. The requested role is ignored; new accounts
    /// always start with the default role.
    #[instrument(skip(self, account), fields(username = %account.username), err)]
    pub async fn register(&self, account: NewAccount) -> IamResult<User> {
        let account = NewAccount {
            role_id: None,
            ..account
        };
        let user = self.accounts.create_user(&account).await?;
        info!("User {} registered", user.username);
        Ok(user)
    }

    #[instrument(skip(self, password), err(level = "info"))]
    pub async fn login(&self, username: &str, password: &str) -> IamResult<LoginOutcome> {
        let mut stage = LoginStage::CredentialsReceived;
        let users = self.accounts.users();

        let Some(user) = users.peek_by_username(username).await? else {
            warn!("Login for '{}' failed at {}: unknown username", username, stage);
            return Err(IamError::InvalidCredentials);
        };
        stage = LoginStage::IdentityResolved;

        // A cache hit may be stale; the credential is always read fresh.
        let Some(credential) = users.directory().find_credential(user.id).await? else {
            warn!(
                "Login for '{}' failed at {}: user {} vanished from the directory",
                username, stage, user.id
            );
            users.invalidate(&user).await;
            return Err(IamError::InvalidCredentials);
        };

        if let Err(e) = credential.status.ensure_can_sign_in() {
            warn!(
                "Login for '{}' failed at {}: account is {:?}",
                username, stage, credential.status
            );
            users.invalidate(&user).await;
            return Err(e);
        }
        stage = LoginStage::StatusChecked;

        if !self.verifier.verify(password, &credential.password_hash) {
            warn!("Login for '{}' failed at {}: wrong password", username, stage);
            return Err(IamError::InvalidCredentials);
        }
        stage = LoginStage::PasswordVerified;

        // Only a record read during this login may refresh the cache entry.
        let fresh = users.directory().find_by_id(user.id).await?;
        let Some(user) = fresh.filter(|fresh| fresh.username == username) else {
            warn!(
                "Login for '{}' failed at {}: cached identity of user {} is stale",
                username, stage, user.id
            );
            users.invalidate(&user).await;
            return Err(IamError::InvalidCredentials);
        };

        let token = self.tokens.issue(user.id).inspect_err(|e| {
            error!("Login for '{}' failed at {}: {}", username, stage, e);
        })?;
        stage = LoginStage::TokenIssued;

        users.cache().put(&user).await;

        let UserWithRole { user, role } = self.accounts.attach_role(user).await?;
        info!("User {} logged in ({})", user.id, stage);
        Ok(LoginOutcome { user, role, token })
    }

    /// Resolve a bearer token to its subject.
    pub fn authenticate(&self, token: &str) -> IamResult<AuthenticatedSubject> {
        self.tokens.verify(token)
    }

    /// Current profile of an authenticated subject, with its role.
    pub async fn current_user(&self, subject: &AuthenticatedSubject) -> IamResult<UserWithRole> {
        self.accounts.get_user_with_role(subject.user_id).await
    }
}
