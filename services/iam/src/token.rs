//! Session token issuance and verification
//!
//! Tokens are HS256 JWTs carrying the subject id, the issue time and an
//! absolute expiry. Verification is purely computational: the signature is
//! checked against the secrets handed out by a [`SecretProvider`], then the
//! expiry is compared with the injected [`Clock`]. There is no server-side
//! revocation list, so a token stays valid until it expires.

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    clock::Clock,
    error::{IamError, IamResult},
    subject::AuthenticatedSubject,
};

/// Source of HMAC secrets.
///
/// `verification_secrets` lists every secret a token may have been signed
/// with, the current one first, so that secrets can rotate without logging
/// everybody out.
pub trait SecretProvider: Send + Sync {
    fn signing_secret(&self) -> Vec<u8>;

    fn verification_secrets(&self) -> Vec<Vec<u8>> {
        vec![self.signing_secret()]
    }
}

/// Fixed secrets, typically read from configuration at startup.
#[derive(Clone)]
pub struct StaticSecret {
    current: Vec<u8>,
    previous: Vec<Vec<u8>>,
}

impl StaticSecret {
    pub fn new(current: impl Into<Vec<u8>>) -> IamResult<Self> {
        let current = current.into();
        if current.is_empty() {
            return Err(IamError::Validation(
                "token signing secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            current,
            previous: Vec::new(),
        })
    }

    /// Keep accepting tokens signed with a retired secret.
    pub fn with_previous(mut self, previous: impl Into<Vec<u8>>) -> Self {
        let previous = previous.into();
        if !previous.is_empty() {
            self.previous.push(previous);
        }
        self
    }
}

impl std::fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSecret")
            .field("previous", &self.previous.len())
            .finish_non_exhaustive()
    }
}

impl SecretProvider for StaticSecret {
    fn signing_secret(&self) -> Vec<u8> {
        self.current.clone()
    }

    fn verification_secrets(&self) -> Vec<Vec<u8>> {
        std::iter::once(self.current.clone())
            .chain(self.previous.iter().cloned())
            .collect()
    }
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: i64,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Expiration, unix seconds
    pub exp: i64,
}

/// A freshly signed token
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Token service
#[derive(Clone)]
pub struct TokenService {
    secrets: Arc<dyn SecretProvider>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    validation: Validation,
}

impl TokenService {
    /// Default lifetime of a session token
    pub const DEFAULT_TTL_SECS: i64 = 24 * 60 * 60;

    pub fn new(secrets: Arc<dyn SecretProvider>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock instead.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        Self {
            secrets,
            clock,
            ttl,
            validation,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `user_id`, valid for the configured window from now.
    pub fn issue(&self, user_id: i64) -> IamResult<IssuedToken> {
        // Claims carry whole seconds; keep the returned times identical to them.
        let issued_at = self.clock.now().trunc_subsecs(0);
        let expires_at = issued_at + self.ttl;

        let claims = Claims {
            sub: user_id,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let secret = self.secrets.signing_secret();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&secret),
        )
        .map_err(|e| IamError::Credential(format!("failed to sign token: {}", e)))?;

        Ok(IssuedToken {
            token,
            issued_at,
            expires_at,
        })
    }

    /// Verify a token and return the subject it was issued for.
    ///
    /// Fails with [`IamError::TokenMalformed`] when no known secret validates
    /// the signature or the payload cannot be decoded, and with
    /// [`IamError::TokenExpired`] once the clock is past the expiry.
    pub fn verify(&self, token: &str) -> IamResult<AuthenticatedSubject> {
        let mut claims = None;
        for secret in self.secrets.verification_secrets() {
            match decode::<Claims>(token, &DecodingKey::from_secret(&secret), &self.validation) {
                Ok(data) => {
                    claims = Some(data.claims);
                    break;
                }
                Err(e) => debug!("Token rejected by a verification secret: {}", e),
            }
        }
        let claims = claims.ok_or(IamError::TokenMalformed)?;

        let issued_at =
            DateTime::from_timestamp(claims.iat, 0).ok_or(IamError::TokenMalformed)?;
        let expires_at =
            DateTime::from_timestamp(claims.exp, 0).ok_or(IamError::TokenMalformed)?;

        if self.clock.now() > expires_at {
            return Err(IamError::TokenExpired);
        }

        Ok(AuthenticatedSubject {
            user_id: claims.sub,
            issued_at,
            expires_at,
        })
    }
}
