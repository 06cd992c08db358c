use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use common::{
    cache::{RedisConfig, RedisPool},
    database,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use iam::{
    AppState,
    cache::{NoopUserCache, RedisUserCache, UserCache},
    clock::SystemClock,
    config::IamConfig,
    repositories::{PgOperationLogStore, PgPermissionGraph, PgUserDirectory},
    routes, seed,
};

/// Redis-backed cache when enabled and reachable, otherwise the no-op cache
async fn build_cache(config: &IamConfig) -> Arc<dyn UserCache> {
    if !config.cache_enabled {
        info!("User cache disabled by configuration");
        return Arc::new(NoopUserCache);
    }

    let redis_config = match RedisConfig::from_env() {
        Ok(redis_config) => RedisConfig {
            operation_timeout_ms: config.cache_timeout_ms,
            ..redis_config
        },
        Err(e) => {
            warn!("Invalid Redis configuration, running without cache: {:#}", e);
            return Arc::new(NoopUserCache);
        }
    };

    let pool = match RedisPool::new(&redis_config).await {
        Ok(pool) => pool,
        Err(e) => {
            warn!("Redis client could not be created, running without cache: {:#}", e);
            return Arc::new(NoopUserCache);
        }
    };

    match pool.health_check().await {
        Ok(true) => {
            info!("User cache backed by Redis");
            Arc::new(RedisUserCache::new(pool).with_ttl(config.cache_ttl_secs))
        }
        Ok(false) | Err(_) => {
            warn!("Redis is unreachable, running without cache");
            Arc::new(NoopUserCache)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting identity & access service");

    let config = IamConfig::from_env()?;
    info!("Loaded configuration: {:?}", config);

    // Initialize database connection pool
    let db_config = database::DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;

    // Check database connectivity
    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    let directory = Arc::new(PgUserDirectory::new(pool.clone()));
    let graph =
        Arc::new(PgPermissionGraph::new(pool.clone()).with_max_role_depth(config.max_role_depth));
    let logs = Arc::new(PgOperationLogStore::new(pool.clone()));
    let cache = build_cache(&config).await;

    let app_state = AppState::build(
        &config,
        directory,
        graph,
        logs,
        cache,
        Arc::new(SystemClock),
    )?
    .with_db_pool(pool);

    if config.seed_base_data {
        let admin = config.admin_seed();
        let report = seed::seed_base_data(&app_state.accounts, admin.as_ref()).await?;
        if report.admin_created {
            info!("Bootstrap administrator '{}' created", config.admin_username);
        }
    } else {
        info!("Base data seeding disabled by configuration");
    }

    // Start the web server
    let app = routes::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Identity & access service listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
