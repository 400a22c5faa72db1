//! Process-wide key material: JWT signing secret and admin HMAC key
//!
//! Verification takes a read lock; rotation takes the write lock, swaps
//! the key and bumps a generation counter so in-flight verifiers observe
//! a consistent (key, generation) pair.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Message the admin token is derived from
const ADMIN_TOKEN_CONTEXT: &[u8] = b"ayb-admin";

/// Shared key material
pub struct Keystore {
    jwt_secret: RwLock<String>,
    generation: AtomicU64,
    admin_key: RwLock<Option<[u8; 32]>>,
}

impl Keystore {
    /// Create a keystore. A missing JWT secret is generated at boot; the
    /// admin key exists only when an admin password is configured.
    pub fn new(jwt_secret: Option<String>, admin_enabled: bool) -> Self {
        let secret = jwt_secret.unwrap_or_else(random_secret);
        Self {
            jwt_secret: RwLock::new(secret),
            generation: AtomicU64::new(1),
            admin_key: RwLock::new(admin_enabled.then(random_key)),
        }
    }

    /// Current JWT signing secret
    pub fn jwt_secret(&self) -> String {
        self.jwt_secret.read().expect("keystore lock").clone()
    }

    /// Rotation generation; bumps on every secret swap
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Atomically replace the JWT secret, invalidating every outstanding
    /// token. Returns the new secret.
    pub fn rotate_jwt_secret(&self) -> String {
        let secret = random_secret();
        {
            let mut guard = self.jwt_secret.write().expect("keystore lock");
            *guard = secret.clone();
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        secret
    }

    /// The admin bearer token for this boot: hex HMAC-SHA256 over the
    /// fixed context string. None when no admin password is configured.
    pub fn admin_token(&self) -> Option<String> {
        let guard = self.admin_key.read().expect("keystore lock");
        guard.map(|key| {
            let mut mac = HmacSha256::new_from_slice(&key).expect("hmac key length");
            mac.update(ADMIN_TOKEN_CONTEXT);
            hex::encode(mac.finalize().into_bytes())
        })
    }

    /// Constant-time admin token check; always false with no admin key
    pub fn is_admin_token(&self, candidate: &str) -> bool {
        match self.admin_token() {
            Some(token) => token.as_bytes().ct_eq(candidate.as_bytes()).into(),
            None => false,
        }
    }

    /// Regenerate the admin key (admin password reset); outstanding admin
    /// tokens stop validating.
    pub fn reset_admin_key(&self) {
        let mut guard = self.admin_key.write().expect("keystore lock");
        *guard = Some(random_key());
    }
}

fn random_key() -> [u8; 32] {
    rand::random()
}

fn random_secret() -> String {
    hex::encode(random_key())
}

/// Constant-time string equality for password checks
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_token_is_stable_within_boot() {
        let keystore = Keystore::new(None, true);
        let first = keystore.admin_token().unwrap();
        let second = keystore.admin_token().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn admin_token_absent_without_password() {
        let keystore = Keystore::new(None, false);
        assert!(keystore.admin_token().is_none());
        assert!(!keystore.is_admin_token("anything"));
        assert!(!keystore.is_admin_token(""));
    }

    #[test]
    fn admin_token_validates() {
        let keystore = Keystore::new(None, true);
        let token = keystore.admin_token().unwrap();
        assert!(keystore.is_admin_token(&token));
        assert!(!keystore.is_admin_token(&token[..63]));
        assert!(!keystore.is_admin_token("0".repeat(64).as_str()));
    }

    #[test]
    fn rotation_changes_secret_and_generation() {
        let keystore = Keystore::new(Some("initial".to_string()), false);
        assert_eq!(keystore.jwt_secret(), "initial");
        let gen_before = keystore.generation();
        let rotated = keystore.rotate_jwt_secret();
        assert_ne!(rotated, "initial");
        assert_eq!(keystore.jwt_secret(), rotated);
        assert_eq!(keystore.generation(), gen_before + 1);
    }

    #[test]
    fn admin_key_reset_invalidates_token() {
        let keystore = Keystore::new(None, true);
        let old = keystore.admin_token().unwrap();
        keystore.reset_admin_key();
        assert!(!keystore.is_admin_token(&old));
        assert!(keystore.is_admin_token(&keystore.admin_token().unwrap()));
    }
}
