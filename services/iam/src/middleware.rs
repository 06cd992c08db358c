//! Bearer token authentication, per-route permission guards and the
//! operation log

use std::{net::SocketAddr, time::Instant};

use axum::{
    Extension,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::{debug, info};

use crate::{
    audit::OperationRecorder, error::IamError, models::NewOperationLog, state::AppState,
    subject::AuthenticatedSubject,
};

/// Verify the bearer token and put the [`AuthenticatedSubject`] into the
/// request extensions.
///
/// Expired and malformed tokens are rejected with different messages so a
/// client can tell "log in again" from "broken token".
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        debug!("Request to {} without bearer token", req.uri().path());
        return IamError::TokenMalformed.into_response();
    };

    let subject = match state.sessions.authenticate(bearer.token()) {
        Ok(subject) => subject,
        Err(e) => {
            info!("Rejected token on {}: {}", req.uri().path(), e);
            return e.into_response();
        }
    };

    req.extensions_mut().insert(subject);
    let mut response = next.run(req).await;
    // Outer layers read the caller from the response.
    response.extensions_mut().insert(subject);
    response
}

/// State for [`permission_guard`]: the services plus the code a route requires
#[derive(Clone)]
pub struct RequiredPermission {
    state: AppState,
    code: &'static str,
}

/// Build the guard state for a route protected by `code`.
pub fn require_permission(state: &AppState, code: &'static str) -> RequiredPermission {
    RequiredPermission {
        state: state.clone(),
        code,
    }
}

/// Reject the request with 403 unless the authenticated subject holds the
/// required permission. Must run after [`auth_middleware`].
pub async fn permission_guard(
    State(required): State<RequiredPermission>,
    Extension(subject): Extension<AuthenticatedSubject>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match required.state.authz.authorize(&subject, required.code).await {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Record every request in the operation log once its response is ready.
///
/// The caller is taken from the response extensions, where
/// [`auth_middleware`] leaves it. Storing the entry happens in the background.
pub async fn operation_log_middleware(
    State(recorder): State<OperationRecorder>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let ip = client_ip(&req);
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let response = next.run(req).await;

    let entry = NewOperationLog {
        user_id: response
            .extensions()
            .get::<AuthenticatedSubject>()
            .map(|subject| subject.user_id),
        ip,
        method,
        path,
        status: i32::from(response.status().as_u16()),
        latency_ms: i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX),
        user_agent,
    };
    recorder.record_detached(entry);
    response
}

/// First `X-Forwarded-For` hop, else the peer address when the server
/// provides it.
fn client_ip(req: &Request<Body>) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());
    if let Some(hop) = forwarded {
        return hop.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}
