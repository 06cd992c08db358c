//! Wiring of the identity & access services

use std::sync::Arc;

use chrono::Duration;
use sqlx::PgPool;

use crate::accounts::AccountService;
use crate::audit::OperationRecorder;
use crate::authz::AuthorizationEngine;
use crate::cache::{CachedDirectory, UserCache};
use crate::clock::Clock;
use crate::config::IamConfig;
use crate::credential::CredentialVerifier;
use crate::error::IamResult;
use crate::repositories::{OperationLogStore, PermissionGraph, UserDirectory};
use crate::session::SessionFlow;
use crate::token::{StaticSecret, TokenService};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionFlow,
    pub accounts: AccountService,
    pub authz: AuthorizationEngine,
    pub operations: OperationRecorder,
    /// Checked by `/health` when the service runs against PostgreSQL
    pub db_pool: Option<PgPool>,
}

impl AppState {
    /// Assemble the services over the given stores, cache and clock.
    pub fn build(
        config: &IamConfig,
        directory: Arc<dyn UserDirectory>,
        graph: Arc<dyn PermissionGraph>,
        logs: Arc<dyn OperationLogStore>,
        cache: Arc<dyn UserCache>,
        clock: Arc<dyn Clock>,
    ) -> IamResult<Self> {
        let mut secret = StaticSecret::new(config.jwt_secret.as_bytes())?;
        if let Some(previous) = &config.jwt_previous_secret {
            secret = secret.with_previous(previous.as_bytes());
        }
        let tokens = TokenService::new(
            Arc::new(secret),
            clock,
            Duration::seconds(config.token_ttl_secs),
        );

        let verifier = CredentialVerifier::new();
        let users = CachedDirectory::new(directory, cache);
        let accounts = AccountService::new(users, graph.clone(), verifier.clone())
            .with_default_role_code(config.default_role_code.clone());

        Ok(Self {
            sessions: SessionFlow::new(accounts.clone(), tokens, verifier),
            accounts,
            authz: AuthorizationEngine::new(graph),
            operations: OperationRecorder::new(logs),
            db_pool: None,
        })
    }

    pub fn with_db_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }
}
