//! Error taxonomy for the identity & access core

use common::error::DatabaseError;
use thiserror::Error;

/// Errors surfaced by the identity & access core
#[derive(Error, Debug)]
pub enum IamError {
    /// A user, role or permission does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Unknown username or wrong password
    #[error("incorrect username or password")]
    InvalidCredentials,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("account is frozen")]
    AccountFrozen,

    #[error("account is pending review")]
    AccountPendingReview,

    /// Bad signature, truncated or otherwise undecodable token
    #[error("token is malformed or its signature is invalid")]
    TokenMalformed,

    #[error("token has expired")]
    TokenExpired,

    /// Duplicate username/code, or an edit that would break a structural rule
    #[error("conflict: {0}")]
    Conflict(String),

    /// The subject lacks the permission guarding the operation
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    /// Input rejected before reaching the store
    #[error("validation failed: {0}")]
    Validation(String),

    /// Role-permission replacement aborted; nothing was applied
    #[error("transaction aborted")]
    Transaction(String),

    /// Password hashing failed
    #[error("credential error: {0}")]
    Credential(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl IamError {
    pub fn not_found(what: impl Into<String>) -> Self {
        IamError::NotFound(what.into())
    }

    /// Message safe to show to an end user.
    pub fn public_message(&self) -> String {
        match self {
            IamError::NotFound(what) => format!("{} not found", what),
            IamError::InvalidCredentials => "incorrect username or password".to_string(),
            IamError::AccountDisabled => "your account has been disabled".to_string(),
            IamError::AccountFrozen => {
                "your account has been frozen, please contact support".to_string()
            }
            IamError::AccountPendingReview => "your account is waiting for review".to_string(),
            IamError::TokenMalformed => "invalid token".to_string(),
            IamError::TokenExpired => "token expired, please log in again".to_string(),
            IamError::Conflict(msg) | IamError::Validation(msg) => msg.clone(),
            IamError::Forbidden(_) => "permission denied".to_string(),
            IamError::Transaction(_) | IamError::Credential(_) | IamError::Database(_) => {
                "internal server error".to_string()
            }
        }
    }

    /// Whether the error is an account-state rejection
    pub fn is_account_state(&self) -> bool {
        matches!(
            self,
            IamError::AccountDisabled | IamError::AccountFrozen | IamError::AccountPendingReview
        )
    }
}

/// Type alias for Result with IamError
pub type IamResult<T> = Result<T, IamError>;

/// Map a sqlx error raised by `operation` into the core taxonomy.
///
/// Unique violations (`23505`) become [`IamError::Conflict`]; everything else
/// is a query failure propagated unchanged.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> IamError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let target = db_err.constraint().unwrap_or("unique key").to_string();
            return IamError::Conflict(format!("{} violates {}", operation, target));
        }
    }
    IamError::Database(DatabaseError::Query(err))
}
