//! Password hashing using Argon2id
//!
//! Argon2id with configurable cost; hashes are stored in PHC string
//! format so verification is self-describing.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as Argon2Hasher, PasswordVerifier,
        SaltString,
    },
    Algorithm, Argon2, Params, Version,
};

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Minimum accepted password length
const MIN_PASSWORD_LENGTH: usize = 8;

/// Password hasher
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::from_config(&AuthConfig::default())
    }
}

impl PasswordHasher {
    /// Build a hasher from the auth configuration
    pub fn from_config(config: &AuthConfig) -> Self {
        let params = Params::new(
            config.argon_memory_kib,
            config.argon_time_cost,
            1,
            None,
        )
        .expect("argon2 parameters");
        Self { params }
    }

    /// Hash a password into PHC format
    pub fn hash(&self, password: &str) -> Result<String> {
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(Error::bad_request(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::internal(format!("password hashing failed: {e}")))?;
        Ok(hash.to_string())
    }

    /// Hash a high-entropy secret (API keys) without the length gate
    pub fn hash_secret(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let hash = argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| Error::internal(format!("secret hashing failed: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verify a candidate against a stored PHC hash
    pub fn verify(&self, candidate: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| Error::internal(format!("invalid stored hash: {e}")))?;
        match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::internal(format!("password verification failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> PasswordHasher {
        PasswordHasher::from_config(&AuthConfig {
            argon_memory_kib: 8,
            argon_time_cost: 1,
            ..AuthConfig::default()
        })
    }

    #[test]
    fn hash_and_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse battery", &hash).unwrap());
        assert!(!hasher.verify("wrong password", &hash).unwrap());
    }

    #[test]
    fn short_passwords_rejected() {
        let hasher = fast_hasher();
        assert!(hasher.hash("short").is_err());
    }

    #[test]
    fn secret_hash_skips_length_gate() {
        let hasher = fast_hasher();
        let hash = hasher.hash_secret("x").unwrap();
        assert!(hasher.verify("x", &hash).unwrap());
    }

    #[test]
    fn salts_differ() {
        let hasher = fast_hasher();
        let a = hasher.hash("same password").unwrap();
        let b = hasher.hash("same password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_is_an_error() {
        let hasher = fast_hasher();
        assert!(hasher.verify("password", "not-a-phc-hash").is_err());
    }
}
