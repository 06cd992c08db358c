//! Shared wiring for the scenario tests: in-memory stores, an in-memory
//! cache and a manual clock, assembled the same way the binary does it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use iam::{
    AppState,
    cache::InMemoryUserCache,
    clock::ManualClock,
    config::IamConfig,
    models::{NewPermission, NewRole, Permission, PermissionKind, Role},
    repositories::{InMemoryStore, PermissionGraph},
};

pub const SECRET: &str = "scenario-test-secret";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<InMemoryUserCache>,
    pub clock: Arc<ManualClock>,
    pub state: AppState,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()
}

pub fn config() -> IamConfig {
    IamConfig::from_map(HashMap::from([(
        "IAM_JWT_SECRET".to_string(),
        SECRET.to_string(),
    )]))
    .unwrap()
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: IamConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let store = Arc::new(
        InMemoryStore::new()
            .with_clock(clock.clone())
            .with_max_role_depth(config.max_role_depth),
    );
    let cache = Arc::new(InMemoryUserCache::new().with_clock(clock.clone()));
    let state = AppState::build(
        &config,
        store.clone(),
        store.clone(),
        store.clone(),
        cache.clone(),
        clock.clone(),
    )
    .unwrap();

    Harness {
        store,
        cache,
        clock,
        state,
    }
}

pub async fn role(store: &InMemoryStore, code: &str, parent_id: Option<i64>) -> Role {
    let mut new_role = NewRole::new(code.to_uppercase(), code);
    new_role.parent_id = parent_id;
    store.create_role(&new_role).await.unwrap()
}

pub async fn permission(store: &InMemoryStore, code: &str, sort: i32) -> Permission {
    let mut new_permission = NewPermission::new(code, code, PermissionKind::Button);
    new_permission.sort = sort;
    store.create_permission(&new_permission).await.unwrap()
}
