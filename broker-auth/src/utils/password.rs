//! Password hashing with Argon2id.
//!
//! The `*_blocking` functions do the CPU-heavy work; the async wrappers move
//! it onto tokio's blocking pool so request tasks are not stalled.

use argon2::{
    password_hash::{
        rand_core::OsRng, Error as HashError, PasswordHash, PasswordHasher, PasswordVerifier,
        SaltString,
    },
    Argon2,
};
use once_cell::sync::Lazy;
use std::fmt;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

/// Newtype for password hash
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Verified against when the login email is unknown, so both failure paths
/// cost one Argon2 verification.
static DUMMY_HASH: Lazy<Option<PasswordHashString>> =
    Lazy::new(|| hash_password_blocking(&Password::new("dummy-password".to_string())).ok());

/// Hash a password using Argon2id with a random salt embedded in the PHC string.
pub fn hash_password_blocking(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is unreadable.
pub fn verify_password_blocking(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<bool, anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    match Argon2::default().verify_password(password.as_str().as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(HashError::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e)),
    }
}

pub async fn hash_password(password: Password) -> Result<PasswordHashString, anyhow::Error> {
    tokio::task::spawn_blocking(move || hash_password_blocking(&password))
        .await
        .map_err(|e| anyhow::anyhow!("Password hashing task failed: {}", e))?
}

/// `None` as the hash burns the same verification time and always yields false.
pub async fn verify_password(
    password: Password,
    password_hash: Option<PasswordHashString>,
) -> Result<bool, anyhow::Error> {
    tokio::task::spawn_blocking(move || match password_hash {
        Some(hash) => verify_password_blocking(&password, &hash),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_ref() {
                let _ = verify_password_blocking(&password, dummy);
            }
            Ok(false)
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!("Password verification task failed: {}", e))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password() {
        let password = Password::new("mySecurePassword123".to_string());
        let hash = hash_password_blocking(&password).expect("Failed to hash password");

        assert!(hash.as_str().starts_with("$argon2id"));
    }

    #[test]
    fn test_verify_password_correct_and_incorrect() {
        let password = Password::new("mySecurePassword123".to_string());
        let hash = hash_password_blocking(&password).expect("Failed to hash password");

        assert!(verify_password_blocking(&password, &hash).unwrap());
        let wrong = Password::new("wrongPassword".to_string());
        assert!(!verify_password_blocking(&wrong, &hash).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        let password = Password::new("whatever".to_string());
        let bogus = PasswordHashString::new("not-a-phc-string".to_string());
        assert!(verify_password_blocking(&password, &bogus).is_err());
    }

    #[test]
    fn test_debug_does_not_leak_password() {
        let password = Password::new("hunter2".to_string());
        assert!(!format!("{:?}", password).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_async_round_trip_and_missing_hash() {
        let hash = hash_password(Password::new("s3cret-pass".to_string()))
            .await
            .unwrap();
        assert!(verify_password(Password::new("s3cret-pass".to_string()), Some(hash))
            .await
            .unwrap());
        assert!(!verify_password(Password::new("s3cret-pass".to_string()), None)
            .await
            .unwrap());
    }
}
