//! User accounts, login, and refresh-token rotation
//!
//! Refresh tokens are opaque 64-hex secrets; only a SHA-256 digest is
//! stored, and rotation is a single conditional UPDATE so exactly one of
//! two racing refreshes wins.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::jwt::TokenService;
use crate::auth::password::PasswordHasher;
use crate::error::{Error, Result};
use crate::validate;

/// A user account
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub verified: bool,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a successful login or refresh
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub jwt: String,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn random_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// Account and session service
#[derive(Clone)]
pub struct AuthService {
    pool: PgPool,
    hasher: PasswordHasher,
    tokens: TokenService,
    refresh_ttl: ChronoDuration,
    magic_link_ttl: ChronoDuration,
}

impl AuthService {
    /// Create the service
    pub fn new(
        pool: PgPool,
        hasher: PasswordHasher,
        tokens: TokenService,
        refresh_ttl_secs: u64,
    ) -> Self {
        Self {
            pool,
            hasher,
            tokens,
            refresh_ttl: ChronoDuration::seconds(refresh_ttl_secs as i64),
            magic_link_ttl: ChronoDuration::minutes(15),
        }
    }

    /// The token service (JWT mint/verify)
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Create an account. Email is case-folded; duplicates conflict.
    pub async fn signup(&self, email: &str, password: &str) -> Result<User> {
        validate::email(email)?;
        let email = email.to_lowercase();
        let password_hash = self.hasher.hash(password)?;

        let result: std::result::Result<User, sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO _ayb_users (id, email, verified, password_hash)
            VALUES ($1, $2, false, $3)
            RETURNING id, email, verified, password_hash, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&password_hash)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::EmailRegistered)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Verify credentials, mint a JWT and persist a refresh token
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair> {
        let email = email.to_lowercase();
        let user: Option<User> = sqlx::query_as(
            "SELECT id, email, verified, password_hash, created_at, updated_at FROM _ayb_users WHERE email = $1",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let user = user.ok_or(Error::InvalidCredentials)?;
        if !self.hasher.verify(password, &user.password_hash)? {
            return Err(Error::InvalidCredentials);
        }

        self.mint_pair(user).await
    }

    async fn mint_pair(&self, user: User) -> Result<TokenPair> {
        let jwt = self.tokens.mint(user.id, &user.email)?;
        let refresh_token = self.persist_refresh(user.id, None).await?;
        Ok(TokenPair {
            jwt,
            refresh_token,
            user: Some(user),
        })
    }

    async fn persist_refresh(&self, user_id: Uuid, fingerprint: Option<&str>) -> Result<String> {
        let token = random_token();
        sqlx::query(
            r#"
            INSERT INTO _ayb_refresh_tokens (id, user_id, secret_sha256, expires_at, device_fingerprint)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(sha256_hex(&token))
        .bind(Utc::now() + self.refresh_ttl)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(token)
    }

    /// Rotate a refresh token atomically; the old token becomes unusable.
    ///
    /// Exactly one of two concurrent refreshes of the same token wins the
    /// conditional UPDATE; the loser gets a conflict, not a new session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let digest = sha256_hex(refresh_token);

        #[derive(sqlx::FromRow)]
        struct Row {
            id: Uuid,
            user_id: Uuid,
            revoked_at: Option<DateTime<Utc>>,
            expires_at: DateTime<Utc>,
        }

        let row: Option<Row> = sqlx::query_as(
            "SELECT id, user_id, revoked_at, expires_at FROM _ayb_refresh_tokens WHERE secret_sha256 = $1",
        )
        .bind(&digest)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(Error::InvalidToken)?;
        if row.revoked_at.is_some() || row.expires_at <= Utc::now() {
            return Err(Error::InvalidToken);
        }

        let claimed = sqlx::query(
            "UPDATE _ayb_refresh_tokens SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(row.id)
        .execute(&self.pool)
        .await?;
        if claimed.rows_affected() == 0 {
            return Err(Error::RefreshInProgress);
        }

        let user: User = sqlx::query_as(
            "SELECT id, email, verified, password_hash, created_at, updated_at FROM _ayb_users WHERE id = $1",
        )
        .bind(row.user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::InvalidToken)?;

        let jwt = self.tokens.mint(user.id, &user.email)?;
        let refresh_token = self.persist_refresh(user.id, None).await?;
        Ok(TokenPair {
            jwt,
            refresh_token,
            user: None,
        })
    }

    /// RFC 7009 revocation: always succeeds, silent on unknown tokens
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let digest = sha256_hex(token);
        sqlx::query(
            "UPDATE _ayb_refresh_tokens SET revoked_at = now() WHERE secret_sha256 = $1 AND revoked_at IS NULL",
        )
        .bind(&digest)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Revoke every session a user holds
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE _ayb_refresh_tokens SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Mint a magic-link token for an existing account
    pub async fn magic_link_mint(&self, email: &str) -> Result<(User, String)> {
        let email = email.to_lowercase();
        let user: User = sqlx::query_as(
            "SELECT id, email, verified, password_hash, created_at, updated_at FROM _ayb_users WHERE email = $1",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::UserNotFound)?;

        let token = random_token();
        sqlx::query(
            r#"
            INSERT INTO _ayb_magic_links (id, user_id, token_sha256, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(sha256_hex(&token))
        .bind(Utc::now() + self.magic_link_ttl)
        .execute(&self.pool)
        .await?;

        Ok((user, token))
    }

    /// Consume a magic-link token; single use, marks the account verified
    pub async fn magic_link_consume(&self, token: &str) -> Result<TokenPair> {
        let digest = sha256_hex(token);

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE _ayb_magic_links
            SET consumed_at = now()
            WHERE token_sha256 = $1 AND consumed_at IS NULL AND expires_at > now()
            RETURNING user_id
            "#,
        )
        .bind(&digest)
        .fetch_optional(&self.pool)
        .await?;

        let (user_id,) = claimed.ok_or(Error::InvalidToken)?;

        let user: User = sqlx::query_as(
            r#"
            UPDATE _ayb_users SET verified = true, updated_at = now()
            WHERE id = $1
            RETURNING id, email, verified, password_hash, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        self.mint_pair(user).await
    }

    /// Fetch by id
    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        sqlx::query_as(
            "SELECT id, email, verified, password_hash, created_at, updated_at FROM _ayb_users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::UserNotFound)
    }

    /// List users with total (admin view)
    pub async fn list_users(&self, page: u32, per_page: u32) -> Result<(Vec<User>, i64)> {
        let offset = (page.saturating_sub(1) as i64) * per_page as i64;
        let users: Vec<User> = sqlx::query_as(
            r#"
            SELECT id, email, verified, password_hash, created_at, updated_at
            FROM _ayb_users
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as("SELECT count(*) FROM _ayb_users")
            .fetch_one(&self.pool)
            .await?;

        Ok((users, total))
    }

    /// Admin delete: cascades to refresh tokens, magic links and API keys.
    /// A remaining foreign-key reference is surfaced as a generic failure.
    pub async fn delete_user(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM _ayb_refresh_tokens WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM _ayb_magic_links WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM _ayb_api_keys WHERE user_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM _ayb_users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(Error::UserNotFound),
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(_) => Err(Error::internal("failed to delete user")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_tokens_are_opaque_hex() {
        let token = random_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, random_token());
    }

    #[test]
    fn digest_is_deterministic_and_one_way() {
        let token = "deadbeef";
        assert_eq!(sha256_hex(token), sha256_hex(token));
        assert_ne!(sha256_hex(token), sha256_hex("deadbeee"));
        assert_eq!(sha256_hex(token).len(), 64);
        assert!(!sha256_hex(token).contains(token));
    }

    #[test]
    fn token_pair_serialization() {
        let pair = TokenPair {
            jwt: "a.b.c".into(),
            refresh_token: "r".into(),
            user: None,
        };
        let json = serde_json::to_string(&pair).unwrap();
        assert!(json.contains("refreshToken"));
        assert!(!json.contains("user"));
    }

    #[test]
    fn password_hash_never_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@b.co".into(),
            verified: true,
            password_hash: "$argon2id$x".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(json.contains("a@b.co"));
    }
}
