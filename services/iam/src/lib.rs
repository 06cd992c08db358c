//! Identity & access control core
//!
//! Session tokens, cache-aside user lookups, role-based permission
//! resolution and an operation log, plus the thin axum surface the `iam`
//! binary serves.

pub mod accounts;
pub mod audit;
pub mod authz;
pub mod cache;
pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod seed;
pub mod session;
pub mod state;
pub mod subject;
pub mod token;
pub mod validation;

pub use accounts::{AccountService, NewAccount};
pub use audit::OperationRecorder;
pub use authz::AuthorizationEngine;
pub use error::{IamError, IamResult};
pub use session::{LoginOutcome, LoginStage, SessionFlow};
pub use state::AppState;
pub use subject::AuthenticatedSubject;
pub use token::TokenService;
