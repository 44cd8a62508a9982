//! Password hashing and validation.
//!
//! Passwords are stored as Argon2id PHC strings, so the salt and the parameters travel
//! with the hash.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand_core::OsRng;
use std::sync::OnceLock;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

const DUMMY_PASSWORD: &str = "unknown-account-placeholder";

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password must be at least {MIN_PASSWORD_LENGTH} characters.")]
    TooShort,

    #[error("Password must be at most {MAX_PASSWORD_LENGTH} characters.")]
    TooLong,

    #[error("password hashing failed: {0}")]
    HashError(String),

    /// The stored hash is not a valid PHC string.
    #[error("invalid password hash format")]
    InvalidHash,

    /// Wrong password.
    #[error("password verification failed")]
    VerificationFailed,
}

impl PasswordError {
    /// Length violations are the caller's fault; everything else is ours.
    pub fn is_validation(&self) -> bool {
        matches!(self, PasswordError::TooShort | PasswordError::TooLong)
    }
}

/// Hash a password with a fresh random salt.
///
/// Validates the length first so an oversized input never reaches the hasher.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    validate_password(password)?;

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashError(e.to_string()))?;

    Ok(hash.to_string())
}

/// Verify a password against a stored PHC hash.
pub fn verify_password(password: &str, hash: &str) -> Result<(), PasswordError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHash)?;

    // Parameters come from the parsed hash, not from the default instance.
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| PasswordError::VerificationFailed)
}

/// Runs a full verification against a fixed hash, for logins whose username does not
/// exist. An unknown account then costs the same Argon2 work as a wrong password.
pub fn verify_dummy_password(password: &str) -> Result<(), PasswordError> {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();
    let hash = DUMMY_HASH.get_or_init(|| hash_password(DUMMY_PASSWORD).unwrap_or_default());
    verify_password(password, hash)
}

pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(PasswordError::TooShort);
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(PasswordError::TooLong);
    }
    Ok(())
}
