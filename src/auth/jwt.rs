//! JWT mint and verify against the keystore's current secret
//!
//! Tokens are HS256. Rotating the keystore secret invalidates every
//! outstanding token at once; there is no key overlap window.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::keystore::Keystore;

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    /// User email at mint time
    pub email: String,
    /// API-key scope when the token was minted through a key exchange
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Owning app, when scoped to one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<Uuid>,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Token minting/verification bound to the keystore
#[derive(Clone)]
pub struct TokenService {
    keystore: Arc<Keystore>,
    access_ttl: Duration,
}

impl TokenService {
    /// Create a token service
    pub fn new(keystore: Arc<Keystore>, access_ttl: Duration) -> Self {
        Self {
            keystore,
            access_ttl,
        }
    }

    /// Access token lifetime
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Mint an access token for a user
    pub fn mint(&self, sub: Uuid, email: &str) -> Result<String> {
        self.mint_with(sub, email, None, None)
    }

    /// Mint with optional key scope and app binding
    pub fn mint_with(
        &self,
        sub: Uuid,
        email: &str,
        scope: Option<String>,
        app_id: Option<Uuid>,
    ) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub,
            email: email.to_string(),
            scope,
            app_id,
            iat: now,
            exp: now + self.access_ttl.as_secs() as i64,
        };
        let secret = self.keystore.jwt_secret();
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| Error::internal(format!("jwt encode failed: {e}")))
    }

    /// Verify a token with the current secret
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let secret = self.keystore.jwt_secret();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|_| Error::InvalidToken)
    }

    /// Whether a string is structurally a JWT (three dot-separated parts)
    pub fn looks_like_jwt(token: &str) -> bool {
        token.splitn(4, '.').count() == 3 && !token.starts_with("ayb_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            Arc::new(Keystore::new(Some("test-secret".into()), false)),
            Duration::from_secs(900),
        )
    }

    #[test]
    fn mint_then_validate() {
        let tokens = service();
        let user = Uuid::new_v4();
        let jwt = tokens.mint(user, "charlie@example.com").unwrap();
        let claims = tokens.validate(&jwt).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.email, "charlie@example.com");
        assert!(claims.exp > claims.iat);
        assert!(claims.scope.is_none());
    }

    #[test]
    fn rotation_invalidates_outstanding_tokens() {
        let keystore = Arc::new(Keystore::new(Some("before".into()), false));
        let tokens = TokenService::new(keystore.clone(), Duration::from_secs(900));
        let jwt = tokens.mint(Uuid::new_v4(), "a@b.co").unwrap();
        assert!(tokens.validate(&jwt).is_ok());

        keystore.rotate_jwt_secret();
        assert!(matches!(tokens.validate(&jwt), Err(Error::InvalidToken)));

        // freshly minted tokens validate against the new secret
        let fresh = tokens.mint(Uuid::new_v4(), "a@b.co").unwrap();
        assert!(tokens.validate(&fresh).is_ok());
    }

    #[test]
    fn tampered_token_rejected() {
        let tokens = service();
        let jwt = tokens.mint(Uuid::new_v4(), "a@b.co").unwrap();
        let mut tampered = jwt.clone();
        tampered.pop();
        tampered.push('A');
        assert!(matches!(tokens.validate(&tampered), Err(Error::InvalidToken)));
    }

    #[test]
    fn structural_sniff() {
        let tokens = service();
        let jwt = tokens.mint(Uuid::new_v4(), "a@b.co").unwrap();
        assert!(TokenService::looks_like_jwt(&jwt));
        assert!(!TokenService::looks_like_jwt("ayb_0123abcd"));
        assert!(!TokenService::looks_like_jwt("plain-token"));
    }

    #[test]
    fn key_scoped_claims_round_trip() {
        let tokens = service();
        let app = Uuid::new_v4();
        let jwt = tokens
            .mint_with(Uuid::new_v4(), "a@b.co", Some("readonly".into()), Some(app))
            .unwrap();
        let claims = tokens.validate(&jwt).unwrap();
        assert_eq!(claims.scope.as_deref(), Some("readonly"));
        assert_eq!(claims.app_id, Some(app));
    }
}
