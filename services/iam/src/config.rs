//! Service configuration
//!
//! Read from `IAM_*` environment variables over built-in defaults, e.g.
//! `IAM_JWT_SECRET`, `IAM_TOKEN_TTL_SECS`, `IAM_CACHE_ENABLED`.
//! The bootstrap administrator is only created when `IAM_ADMIN_PASSWORD` is set.

use std::collections::HashMap;

use anyhow::{Context, Result, ensure};
use config::{Config, Environment};
use serde::Deserialize;

use crate::seed::AdminSeed;

#[derive(Clone, Deserialize)]
pub struct IamConfig {
    /// HMAC secret used to sign new tokens
    pub jwt_secret: String,
    /// Retired secret still accepted during rotation
    #[serde(default)]
    pub jwt_previous_secret: Option<String>,
    pub token_ttl_secs: i64,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_timeout_ms: u64,
    pub default_role_code: String,
    pub max_role_depth: u32,
    pub bind_addr: String,
    /// Create missing base roles and permissions at startup
    pub seed_base_data: bool,
    pub admin_username: String,
    #[serde(default)]
    pub admin_password: Option<String>,
}

impl std::fmt::Debug for IamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IamConfig")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("cache_enabled", &self.cache_enabled)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("cache_timeout_ms", &self.cache_timeout_ms)
            .field("default_role_code", &self.default_role_code)
            .field("max_role_depth", &self.max_role_depth)
            .field("bind_addr", &self.bind_addr)
            .field("seed_base_data", &self.seed_base_data)
            .field("admin_username", &self.admin_username)
            .finish_non_exhaustive()
    }
}

impl IamConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::load(Environment::with_prefix("IAM"))
    }

    /// Load configuration from an explicit variable map keyed like the environment
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        Self::load(Environment::with_prefix("IAM").source(Some(vars)))
    }

    fn load(env: Environment) -> Result<Self> {
        let config: IamConfig = Config::builder()
            .set_default("token_ttl_secs", 86_400_i64)?
            .set_default("cache_enabled", true)?
            .set_default("cache_ttl_secs", 3_600_i64)?
            .set_default("cache_timeout_ms", 250_i64)?
            .set_default("default_role_code", "user")?
            .set_default("max_role_depth", 16_i64)?
            .set_default("bind_addr", "0.0.0.0:3000")?
            .set_default("seed_base_data", true)?
            .set_default("admin_username", "admin")?
            .add_source(env.try_parsing(true))
            .build()
            .context("failed to read IAM configuration")?
            .try_deserialize()
            .context("invalid IAM configuration")?;

        ensure!(!config.jwt_secret.is_empty(), "IAM_JWT_SECRET must not be empty");
        ensure!(config.token_ttl_secs > 0, "IAM_TOKEN_TTL_SECS must be positive");
        ensure!(config.max_role_depth > 0, "IAM_MAX_ROLE_DEPTH must be positive");
        Ok(config)
    }

    /// Bootstrap administrator, when a password was configured
    pub fn admin_seed(&self) -> Option<AdminSeed> {
        self.admin_password
            .as_deref()
            .filter(|password| !password.is_empty())
            .map(|password| AdminSeed {
                username: self.admin_username.clone(),
                password: password.to_string(),
            })
    }
}
