mod support;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Duration;
use iam::{repositories::PermissionGraph, routes::{USER_LIST_PERMISSION, create_router}};
use serde_json::{Value, json};
use tower::ServiceExt;

use support::{harness, permission};

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

async fn register_and_login(app: &Router, username: &str) -> String {
    let (status, _) = send(
        app,
        post_json(
            "/auth/register",
            json!({"username": username, "password": "password1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        app,
        post_json(
            "/auth/login",
            json!({"username": username, "password": "password1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert!(body["user"].get("password_hash").is_none());
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let app = create_router(h.state.clone());

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "not configured");
}

#[tokio::test]
async fn test_login_failures_map_to_status_codes() {
    let h = harness();
    let app = create_router(h.state.clone());
    register_and_login(&app, "mallory").await;

    let (status, body) = send(
        &app,
        post_json("/auth/login", json!({"username": "mallory", "password": "nope-nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");
    assert_eq!(body["message"], "incorrect username or password");

    let (status, body) = send(
        &app,
        post_json("/auth/register", json!({"username": "mallory", "password": "password1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, body) = send(
        &app,
        post_json("/auth/register", json!({"username": "x", "password": "password1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_me_requires_a_valid_token() {
    let h = harness();
    let app = create_router(h.state.clone());
    let token = register_and_login(&app, "niaj").await;

    let (status, body) = send(&app, get_with_token("/auth/me", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "niaj");
    assert_eq!(body["role"]["code"], "user");

    let missing = Request::get("/auth/me").body(Body::empty()).unwrap();
    let (status, _) = send(&app, missing).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, get_with_token("/auth/me", "garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token_malformed");

    h.clock.advance(Duration::hours(25));
    let (status, body) = send(&app, get_with_token("/auth/me", &token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token_expired");
}

#[tokio::test]
async fn test_permission_guard_follows_assignments() {
    let h = harness();
    let app = create_router(h.state.clone());
    let token = register_and_login(&app, "olivia").await;

    let (status, body) = send(&app, get_with_token("/users", &token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let list = permission(&h.store, USER_LIST_PERMISSION, 0).await;
    let default_role = h.store.find_role_by_code("user").await.unwrap().unwrap();
    h.store
        .replace_role_permissions(default_role.id, &[list.id])
        .await
        .unwrap();

    let (status, body) = send(&app, get_with_token("/auth/permissions", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["codes"], json!([USER_LIST_PERMISSION]));

    let (status, body) = send(&app, get_with_token("/users?page=1&page_size=10", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["username"], "olivia");
}
