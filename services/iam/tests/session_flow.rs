mod support;

use chrono::Duration;
use iam::{
    IamError, NewAccount,
    cache::UserCache,
    models::{ProfileUpdate, UserStatus},
    repositories::UserDirectory,
};

use support::harness;

#[tokio::test]
async fn test_register_then_login() {
    let h = harness();
    let sessions = &h.state.sessions;

    let mut account = NewAccount::new("alice", "wonderland");
    account.email = "alice@example.com".to_string();
    let user = sessions.register(account).await.unwrap();
    assert_eq!(user.status, UserStatus::Active);

    let outcome = sessions.login("alice", "wonderland").await.unwrap();
    assert_eq!(outcome.user.id, user.id);
    assert_eq!(outcome.role.map(|r| r.code), Some("user".to_string()));

    let subject = sessions.authenticate(&outcome.token.token).unwrap();
    assert_eq!(subject.user_id, user.id);
    assert_eq!(subject.expires_at, outcome.token.expires_at);
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_look_the_same() {
    let h = harness();
    let sessions = &h.state.sessions;
    sessions
        .register(NewAccount::new("bob", "builder1"))
        .await
        .unwrap();

    let wrong_password = sessions.login("bob", "builder2").await.unwrap_err();
    let unknown_user = sessions.login("nobody", "builder1").await.unwrap_err();

    assert!(matches!(wrong_password, IamError::InvalidCredentials));
    assert!(matches!(unknown_user, IamError::InvalidCredentials));
    assert_eq!(wrong_password.public_message(), unknown_user.public_message());
}

#[tokio::test]
async fn test_each_blocked_state_has_its_own_reason() {
    let h = harness();
    let sessions = &h.state.sessions;
    let accounts = &h.state.accounts;
    let user = sessions
        .register(NewAccount::new("carol", "carol-pass"))
        .await
        .unwrap();

    let cases = [
        (UserStatus::Disabled, IamError::AccountDisabled),
        (UserStatus::Frozen, IamError::AccountFrozen),
        (UserStatus::PendingReview, IamError::AccountPendingReview),
    ];
    for (status, expected) in cases {
        accounts.update_status(user.id, status).await.unwrap();
        let err = sessions.login("carol", "carol-pass").await.unwrap_err();
        assert_eq!(
            std::mem::discriminant(&err),
            std::mem::discriminant(&expected),
            "unexpected error for {:?}: {:?}",
            status,
            err
        );
    }

    accounts
        .update_status(user.id, UserStatus::Active)
        .await
        .unwrap();
    assert!(sessions.login("carol", "carol-pass").await.is_ok());
}

#[tokio::test]
async fn test_blocked_account_is_never_cached_by_login() {
    let h = harness();
    let sessions = &h.state.sessions;
    let user = sessions
        .register(NewAccount::new("dave", "dave-pass"))
        .await
        .unwrap();

    // Warm the cache with the active record, then disable behind its back.
    sessions.login("dave", "dave-pass").await.unwrap();
    assert!(h.cache.get_by_id(user.id).await.is_some());
    h.store
        .update_status(user.id, UserStatus::Disabled)
        .await
        .unwrap();

    let err = sessions.login("dave", "dave-pass").await.unwrap_err();
    assert!(matches!(err, IamError::AccountDisabled));
    assert_eq!(h.cache.get_by_id(user.id).await, None);
    assert_eq!(h.cache.get_by_username("dave").await, None);

    // A fresh miss must not repopulate it either.
    let err = sessions.login("dave", "dave-pass").await.unwrap_err();
    assert!(matches!(err, IamError::AccountDisabled));
    assert_eq!(h.cache.get_by_id(user.id).await, None);
}

#[tokio::test]
async fn test_successful_login_populates_cache() {
    let h = harness();
    let sessions = &h.state.sessions;
    let user = sessions
        .register(NewAccount::new("erin", "erin-pass"))
        .await
        .unwrap();
    assert!(h.cache.is_empty());

    sessions.login("erin", "erin-pass").await.unwrap();
    assert_eq!(h.cache.get_by_username("erin").await.map(|u| u.id), Some(user.id));
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let h = harness();
    let sessions = &h.state.sessions;
    sessions
        .register(NewAccount::new("frank", "frank-pass"))
        .await
        .unwrap();

    let err = sessions
        .register(NewAccount::new("frank", "other-pass"))
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::Conflict(_)));
}

#[tokio::test]
async fn test_login_uses_fresh_credential_after_password_change() {
    let h = harness();
    let sessions = &h.state.sessions;
    let user = sessions
        .register(NewAccount::new("grace", "first-pass"))
        .await
        .unwrap();
    sessions.login("grace", "first-pass").await.unwrap();

    h.state
        .accounts
        .change_password(user.id, "first-pass", "second-pass")
        .await
        .unwrap();

    assert!(matches!(
        sessions.login("grace", "first-pass").await,
        Err(IamError::InvalidCredentials)
    ));
    assert!(sessions.login("grace", "second-pass").await.is_ok());
}

#[tokio::test]
async fn test_token_lifetime_follows_the_clock() {
    let h = harness();
    let sessions = &h.state.sessions;
    sessions
        .register(NewAccount::new("heidi", "heidi-pass"))
        .await
        .unwrap();
    let token = sessions.login("heidi", "heidi-pass").await.unwrap().token;

    h.clock.advance(Duration::hours(24));
    assert!(sessions.authenticate(&token.token).is_ok());

    h.clock.advance(Duration::seconds(1));
    assert!(matches!(
        sessions.authenticate(&token.token),
        Err(IamError::TokenExpired)
    ));
}

#[tokio::test]
async fn test_current_user_carries_role() {
    let h = harness();
    let sessions = &h.state.sessions;
    sessions
        .register(NewAccount::new("ivan", "ivan-pass"))
        .await
        .unwrap();
    let outcome = sessions.login("ivan", "ivan-pass").await.unwrap();
    let subject = sessions.authenticate(&outcome.token.token).unwrap();

    let current = sessions.current_user(&subject).await.unwrap();
    assert_eq!(current.user.username, "ivan");
    assert_eq!(current.role.map(|r| r.code), Some("user".to_string()));
}

#[tokio::test]
async fn test_frequent_logins_do_not_extend_a_stale_entry() {
    let h = harness();
    let sessions = &h.state.sessions;
    let user = sessions
        .register(NewAccount::new("kim", "kim-pass"))
        .await
        .unwrap();
    sessions.login("kim", "kim-pass").await.unwrap();

    // Directory write that skips invalidation, leaving the cache stale.
    let update = ProfileUpdate {
        nickname: Some("renamed".to_string()),
        ..Default::default()
    };
    h.store.update(user.id, &update).await.unwrap();
    assert_eq!(
        h.cache.get_by_id(user.id).await.map(|u| u.nickname),
        Some(String::new())
    );

    // Log in more often than the cache TTL for five hours.
    for _ in 0..6 {
        h.clock.advance(Duration::minutes(50));
        let outcome = sessions.login("kim", "kim-pass").await.unwrap();
        assert_eq!(outcome.user.nickname, "renamed");
        assert_eq!(
            h.cache.get_by_id(user.id).await.map(|u| u.nickname),
            Some("renamed".to_string())
        );
    }
}

#[tokio::test]
async fn test_login_with_username_renamed_behind_cache() {
    let h = harness();
    let sessions = &h.state.sessions;
    let user = sessions
        .register(NewAccount::new("judy", "judy-pass"))
        .await
        .unwrap();
    sessions.login("judy", "judy-pass").await.unwrap();

    let rename = ProfileUpdate {
        username: Some("judith".to_string()),
        ..Default::default()
    };
    h.store.update(user.id, &rename).await.unwrap();

    // The cached old name no longer identifies the account.
    assert!(matches!(
        sessions.login("judy", "judy-pass").await,
        Err(IamError::InvalidCredentials)
    ));
    assert_eq!(h.cache.get_by_username("judy").await, None);

    let outcome = sessions.login("judith", "judy-pass").await.unwrap();
    assert_eq!(outcome.user.id, user.id);
}
