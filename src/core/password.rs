//! Password hashing and verification (argon2id).

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use super::error::{CoreError, CoreResult};

/// Hash a plaintext password for storage.
///
/// # Errors
/// Returns `Internal` if hashing fails.
pub fn hash_password(password: &str) -> CoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CoreError::Internal(anyhow::anyhow!("failed to hash password: {e}")))?;
    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored hash.
///
/// A malformed stored hash is an internal inconsistency, not a bad
/// credential.
///
/// # Errors
/// Returns `IncorrectCredentials` on mismatch, `Internal` on a malformed
/// stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> CoreResult<()> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| CoreError::Internal(anyhow::anyhow!("malformed password hash: {e}")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| CoreError::IncorrectCredentials)
}
