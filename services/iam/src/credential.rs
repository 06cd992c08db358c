//! Password hashing and verification

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use tracing::warn;

use crate::error::{IamError, IamResult};

/// Argon2id password hasher.
///
/// Stateless; cloning is free.
#[derive(Debug, Clone, Default)]
pub struct CredentialVerifier;

impl CredentialVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Hash a plaintext password with a fresh random salt, returning the PHC string.
    pub fn hash(&self, plaintext: &str) -> IamResult<String> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| IamError::Credential(format!("failed to hash password: {}", e)))
    }

    /// Check a plaintext password against a stored hash.
    ///
    /// A mismatch is `false`. So is a stored hash that cannot be parsed; that
    /// case is logged since it points at corrupt data rather than a bad login.
    pub fn verify(&self, plaintext: &str, stored_hash: &str) -> bool {
        let parsed = match PasswordHash::new(stored_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Stored password hash is not a valid PHC string: {}", e);
                return false;
            }
        };

        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}
