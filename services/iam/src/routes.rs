//! Identity & access service routes

use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    accounts::NewAccount,
    error::IamError,
    middleware::{auth_middleware, operation_log_middleware, permission_guard, require_permission},
    models::{LogFilter, Permission, Role, User, UserFilter},
    state::AppState,
    subject::AuthenticatedSubject,
};

/// Permission guarding the user listing
pub const USER_LIST_PERMISSION: &str = "system:user:list";

/// Permission guarding the operation log listing
pub const LOG_LIST_PERMISSION: &str = "system:log:list";

/// Request for user login
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response for user login
#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub user: User,
    pub role: Option<Role>,
}

/// Response listing the caller's effective permissions
#[derive(Serialize)]
pub struct PermissionsResponse {
    pub codes: Vec<String>,
    pub permissions: Vec<Permission>,
}

/// Create the router for the identity & access service
pub fn create_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/users", get(list_users))
        .route_layer(from_fn_with_state(
            require_permission(&state, USER_LIST_PERMISSION),
            permission_guard,
        ));

    let audited = Router::new()
        .route("/operation-logs", get(list_operation_logs))
        .route_layer(from_fn_with_state(
            require_permission(&state, LOG_LIST_PERMISSION),
            permission_guard,
        ));

    let authenticated = Router::new()
        .route("/auth/me", get(me))
        .route("/auth/permissions", get(permissions))
        .merge(guarded)
        .merge(audited)
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    // Outermost, so it sees the subject the auth layer attaches to responses
    Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .merge(authenticated)
        .layer(from_fn_with_state(
            state.operations.clone(),
            operation_log_middleware,
        ))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db_pool {
        Some(pool) => match common::database::health_check(pool).await {
            Ok(true) => "ok",
            _ => "unavailable",
        },
        None => "not configured",
    };

    Json(serde_json::json!({
        "status": "ok",
        "service": "iam",
        "database": database,
    }))
}

/// User self-registration endpoint
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<NewAccount>,
) -> Result<impl IntoResponse, IamError> {
    info!("Registration attempt for user: {}", payload.username);
    let user = state.sessions.register(payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, IamError> {
    info!("Login attempt for user: {}", payload.username);

    let outcome = state
        .sessions
        .login(&payload.username, &payload.password)
        .await?;

    Ok(Json(LoginResponse {
        access_token: outcome.token.token,
        token_type: "Bearer",
        expires_at: outcome.token.expires_at,
        user: outcome.user,
        role: outcome.role,
    }))
}

/// Profile of the authenticated caller
pub async fn me(
    State(state): State<AppState>,
    Extension(subject): Extension<AuthenticatedSubject>,
) -> Result<impl IntoResponse, IamError> {
    Ok(Json(state.sessions.current_user(&subject).await?))
}

/// Effective permissions of the authenticated caller
pub async fn permissions(
    State(state): State<AppState>,
    Extension(subject): Extension<AuthenticatedSubject>,
) -> Result<impl IntoResponse, IamError> {
    let permissions = state.authz.permissions_of(subject.user_id).await?;
    let codes = permissions.iter().map(|p| p.code.clone()).collect();
    Ok(Json(PermissionsResponse { codes, permissions }))
}

/// Paged user listing, guarded by [`USER_LIST_PERMISSION`]
pub async fn list_users(
    State(state): State<AppState>,
    Query(filter): Query<UserFilter>,
) -> Result<impl IntoResponse, IamError> {
    Ok(Json(state.accounts.list_users(&filter).await?))
}

/// Paged operation log, guarded by [`LOG_LIST_PERMISSION`]
pub async fn list_operation_logs(
    State(state): State<AppState>,
    Query(filter): Query<LogFilter>,
) -> Result<impl IntoResponse, IamError> {
    Ok(Json(state.operations.list(&filter).await?))
}

impl IamError {
    fn status_code(&self) -> StatusCode {
        match self {
            IamError::NotFound(_) => StatusCode::NOT_FOUND,
            IamError::InvalidCredentials | IamError::TokenMalformed | IamError::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            IamError::AccountDisabled
            | IamError::AccountFrozen
            | IamError::AccountPendingReview
            | IamError::Forbidden(_) => StatusCode::FORBIDDEN,
            IamError::Conflict(_) => StatusCode::CONFLICT,
            IamError::Validation(_) => StatusCode::BAD_REQUEST,
            IamError::Transaction(_) | IamError::Credential(_) | IamError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            IamError::NotFound(_) => "not_found",
            IamError::InvalidCredentials => "invalid_credentials",
            IamError::AccountDisabled => "account_disabled",
            IamError::AccountFrozen => "account_frozen",
            IamError::AccountPendingReview => "account_pending_review",
            IamError::TokenMalformed => "token_malformed",
            IamError::TokenExpired => "token_expired",
            IamError::Conflict(_) => "conflict",
            IamError::Forbidden(_) => "forbidden",
            IamError::Validation(_) => "validation_error",
            IamError::Transaction(_) | IamError::Credential(_) | IamError::Database(_) => {
                "internal_error"
            }
        }
    }
}

impl IntoResponse for IamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = Json(serde_json::json!({
            "error": self.error_code(),
            "message": self.public_message(),
        }));

        (status, body).into_response()
    }
}
