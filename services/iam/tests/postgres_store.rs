//! PostgreSQL-backed repository tests
//!
//! They need a disposable database reachable through `DATABASE_URL` and run
//! with `cargo test -- --ignored`. Every test recreates the schema.

use common::database::{DatabaseConfig, init_pool};
use serial_test::serial;
use sqlx::PgPool;

use iam::{
    IamError,
    models::{
        LogFilter, NewOperationLog, NewPermission, NewRole, NewUser, PermissionKind,
        ProfileUpdate, RecordStatus, UpdateRole, UserFilter, UserStatus,
    },
    repositories::{
        OperationLogStore, PermissionGraph, PgOperationLogStore, PgPermissionGraph,
        PgUserDirectory, UserDirectory,
    },
};

async fn fresh_pool() -> PgPool {
    let config = DatabaseConfig::from_env().unwrap();
    let pool = init_pool(&config).await.unwrap();
    sqlx::raw_sql(
        "DROP TABLE IF EXISTS operation_logs, role_permissions, users, permissions, roles CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::raw_sql(include_str!("../schema/iam.sql"))
        .execute(&pool)
        .await
        .unwrap();
    pool
}

fn new_user(username: &str, role_id: Option<i64>) -> NewUser {
    NewUser {
        username: username.to_string(),
        password_hash: "$argon2id$placeholder".to_string(),
        nickname: format!("{} nick", username),
        email: format!("{}@example.com", username),
        phone: String::new(),
        avatar: String::new(),
        status: UserStatus::Active,
        role_id,
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires a running PostgreSQL instance"]
async fn test_assignment_churn_against_postgres() {
    let pool = fresh_pool().await;
    let users = PgUserDirectory::new(pool.clone());
    let graph = PgPermissionGraph::new(pool.clone());

    let r1 = graph.create_role(&NewRole::new("R1", "r1")).await.unwrap();
    let p1 = graph
        .create_permission(&NewPermission::new("List users", "system:user:list", PermissionKind::Button))
        .await
        .unwrap();
    let u1 = users.create(&new_user("u1", Some(r1.id))).await.unwrap();

    graph.replace_role_permissions(r1.id, &[p1.id]).await.unwrap();
    assert!(graph.has_permission(u1.id, &p1.code).await.unwrap());

    graph.replace_role_permissions(r1.id, &[]).await.unwrap();
    assert!(!graph.has_permission(u1.id, &p1.code).await.unwrap());

    graph
        .replace_role_permissions(r1.id, &[p1.id, p1.id])
        .await
        .unwrap();
    assert!(graph.has_permission(u1.id, &p1.code).await.unwrap());

    graph
        .set_permission_status(p1.id, RecordStatus::Disabled)
        .await
        .unwrap();
    assert!(!graph.has_permission(u1.id, &p1.code).await.unwrap());
    assert!(graph.permissions_of_user(u1.id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires a running PostgreSQL instance"]
async fn test_failed_replacement_keeps_previous_set() {
    let pool = fresh_pool().await;
    let graph = PgPermissionGraph::new(pool.clone());

    let role = graph.create_role(&NewRole::new("Ops", "ops")).await.unwrap();
    let menu = graph
        .create_permission(&NewPermission::new("Menu", "system:menu", PermissionKind::Menu))
        .await
        .unwrap();
    graph.replace_role_permissions(role.id, &[menu.id]).await.unwrap();

    // The foreign key on the unknown id aborts the whole replacement.
    let result = graph.replace_role_permissions(role.id, &[999_999]).await;
    assert!(matches!(result, Err(IamError::Transaction(_))));
    let kept = graph.role_permissions(role.id).await.unwrap();
    assert_eq!(kept.iter().map(|p| p.id).collect::<Vec<_>>(), vec![menu.id]);

    assert!(matches!(
        graph.replace_role_permissions(424_242, &[menu.id]).await,
        Err(IamError::NotFound(_))
    ));
}

#[tokio::test]
#[serial]
#[ignore = "requires a running PostgreSQL instance"]
async fn test_hierarchy_and_cycle_guard_against_postgres() {
    let pool = fresh_pool().await;
    let users = PgUserDirectory::new(pool.clone());
    let graph = PgPermissionGraph::new(pool.clone()).with_max_role_depth(2);

    let root = graph.create_role(&NewRole::new("Root", "root")).await.unwrap();
    let mut middle = NewRole::new("Middle", "middle");
    middle.parent_id = Some(root.id);
    let middle = graph.create_role(&middle).await.unwrap();
    let mut leaf = NewRole::new("Leaf", "leaf");
    leaf.parent_id = Some(middle.id);
    let leaf = graph.create_role(&leaf).await.unwrap();

    let audit = graph
        .create_permission(&NewPermission::new("Audit", "system:audit", PermissionKind::Data))
        .await
        .unwrap();
    graph.replace_role_permissions(root.id, &[audit.id]).await.unwrap();

    let user = users.create(&new_user("deep", Some(middle.id))).await.unwrap();
    assert!(graph.has_permission(user.id, "system:audit").await.unwrap());

    // Three levels away is beyond a depth cap of two.
    users.update_role(user.id, Some(leaf.id)).await.unwrap();
    assert!(!graph.has_permission(user.id, "system:audit").await.unwrap());

    let closes_loop = UpdateRole {
        parent_id: Some(Some(leaf.id)),
        ..Default::default()
    };
    assert!(matches!(
        graph.update_role(root.id, &closes_loop).await,
        Err(IamError::Conflict(_))
    ));

    graph.delete_role(middle.id).await.unwrap();
    let leaf = graph.find_role(leaf.id).await.unwrap().unwrap();
    assert_eq!(leaf.parent_id, None);
}

#[tokio::test]
#[serial]
#[ignore = "requires a running PostgreSQL instance"]
async fn test_soft_delete_and_restore_against_postgres() {
    let pool = fresh_pool().await;
    let users = PgUserDirectory::new(pool.clone());

    let original = users.create(&new_user("u1", None)).await.unwrap();
    assert!(matches!(
        users.create(&new_user("u1", None)).await,
        Err(IamError::Conflict(_))
    ));

    users.soft_delete(original.id).await.unwrap();
    assert_eq!(users.find_by_username("u1").await.unwrap(), None);
    assert!(users.find_credential(original.id).await.unwrap().is_none());
    assert!(users.find_any_by_id(original.id).await.unwrap().unwrap().is_deleted());

    let restored = users.restore(original.id).await.unwrap();
    assert_eq!(restored.nickname, original.nickname);
    assert_eq!(restored.email, original.email);
    assert_eq!(
        users.find_by_username("u1").await.unwrap().map(|u| u.id),
        Some(original.id)
    );
    assert!(matches!(
        users.restore(original.id).await,
        Err(IamError::Conflict(_))
    ));

    // Tombstoned usernames may be reused; the original cannot come back then.
    users.soft_delete(original.id).await.unwrap();
    users.create(&new_user("u1", None)).await.unwrap();
    assert!(matches!(
        users.restore(original.id).await,
        Err(IamError::Conflict(_))
    ));
}

#[tokio::test]
#[serial]
#[ignore = "requires a running PostgreSQL instance"]
async fn test_profile_update_and_listing_against_postgres() {
    let pool = fresh_pool().await;
    let users = PgUserDirectory::new(pool.clone());

    let alice = users.create(&new_user("alice", None)).await.unwrap();
    users.create(&new_user("bob", None)).await.unwrap();

    let update = ProfileUpdate {
        nickname: Some("Queen Alice".to_string()),
        ..Default::default()
    };
    let updated = users.update(alice.id, &update).await.unwrap();
    assert_eq!(updated.nickname, "Queen Alice");
    assert_eq!(updated.email, alice.email);

    let rename = ProfileUpdate {
        username: Some("bob".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        users.update(alice.id, &rename).await,
        Err(IamError::Conflict(_))
    ));

    let page = users
        .list_page(&UserFilter {
            keyword: Some("Queen".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, alice.id);

    let page = users.list_page(&UserFilter::default()).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].username, "bob");
}

#[tokio::test]
#[serial]
#[ignore = "requires a running PostgreSQL instance"]
async fn test_operation_logs_against_postgres() {
    let pool = fresh_pool().await;
    let users = PgUserDirectory::new(pool.clone());
    let logs = PgOperationLogStore::new(pool.clone());
    let u1 = users.create(&new_user("u1", None)).await.unwrap();

    let requests = [
        (Some(u1.id), "/auth/me"),
        (None, "/auth/login"),
        (Some(u1.id), "/users"),
    ];
    for (user_id, path) in requests {
        logs.record(&NewOperationLog {
            user_id,
            ip: "10.0.0.1".to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            status: 200,
            latency_ms: 3,
            user_agent: "curl/8".to_string(),
        })
        .await
        .unwrap();
    }

    let all = logs.list_logs(&LogFilter::default()).await.unwrap();
    assert_eq!(all.total, 3);
    assert_eq!(all.items[0].path, "/users");

    let mine = logs
        .list_logs(&LogFilter {
            page: 1,
            page_size: 1,
            user_id: Some(u1.id),
        })
        .await
        .unwrap();
    assert_eq!(mine.total, 2);
    assert_eq!(mine.items.len(), 1);
    assert_eq!(mine.items[0].path, "/users");

    // Deleting the user keeps its log lines
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(u1.id)
        .execute(&pool)
        .await
        .unwrap();
    let orphaned = logs.list_logs(&LogFilter::default()).await.unwrap();
    assert_eq!(orphaned.total, 3);
    assert!(orphaned.items.iter().all(|log| log.user_id.is_none()));
}
