//! API key generation, verification and storage
//!
//! Keys are `ayb_` followed by 48 hex characters. The plaintext is
//! returned exactly once at creation; only an Argon2id hash is stored,
//! alongside a short prefix kept for identification in listings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::password::PasswordHasher;
use crate::error::{Error, Result};
use crate::validate;

/// Plaintext prefix shared by every key
pub const KEY_PREFIX: &str = "ayb_";

/// Hex chars following the prefix
const KEY_HEX_LEN: usize = 48;

/// Identification prefix length stored in the clear (`ayb_` + 8 hex)
const LOOKUP_PREFIX_LEN: usize = KEY_PREFIX.len() + 8;

/// An API key record (hash at rest, never the plaintext)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub app_id: Option<Uuid>,
    /// First characters of the plaintext, shown for identification
    pub prefix: String,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub name: String,
    /// One of `*`, `readonly`, `readwrite`
    pub scope: String,
    /// Tables this key may touch; empty means all
    pub allowed_tables: Vec<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// Whether this key may perform writes
    pub fn can_write(&self) -> bool {
        matches!(self.scope.as_str(), "*" | "readwrite")
    }

    /// Whether this key may touch the given table
    pub fn table_allowed(&self, table: &str) -> bool {
        self.allowed_tables.is_empty() || self.allowed_tables.iter().any(|t| t == table)
    }

    /// Active predicate: a revoked key never authenticates
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Options accepted at key creation
#[derive(Debug, Default)]
pub struct CreateKeyOptions {
    /// Scope; defaults to `*`
    pub scope: Option<String>,
    /// Owning app
    pub app_id: Option<Uuid>,
    /// Table allowlist; empty means all
    pub allowed_tables: Vec<String>,
}

/// Generate a fresh plaintext key with its lookup prefix
pub fn generate_plaintext() -> (String, String) {
    let bytes: [u8; 24] = rand::random();
    let plaintext = format!("{KEY_PREFIX}{}", hex::encode(bytes));
    let prefix = plaintext[..LOOKUP_PREFIX_LEN].to_string();
    (plaintext, prefix)
}

/// Whether a bearer value is structurally an API key
pub fn looks_like_key(token: &str) -> bool {
    token.len() == KEY_PREFIX.len() + KEY_HEX_LEN
        && token.starts_with(KEY_PREFIX)
        && token[KEY_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit())
}

/// API key storage over the shared pool
#[derive(Clone)]
pub struct ApiKeyStore {
    pool: PgPool,
    hasher: PasswordHasher,
}

impl ApiKeyStore {
    /// Create a store
    pub fn new(pool: PgPool, hasher: PasswordHasher) -> Self {
        Self { pool, hasher }
    }

    /// Create a key; returns the plaintext (shown once) and the record
    pub async fn create(
        &self,
        user_id: Uuid,
        name: &str,
        opts: CreateKeyOptions,
    ) -> Result<(String, ApiKey)> {
        let scope = opts.scope.unwrap_or_else(|| "*".to_string());
        validate::scope(&scope)?;

        if let Some(app_id) = opts.app_id {
            let exists: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM _ayb_apps WHERE id = $1")
                    .bind(app_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                return Err(Error::InvalidAppId);
            }
        }

        let (plaintext, prefix) = generate_plaintext();
        let secret_hash = self.hasher.hash_secret(&plaintext)?;

        let key: ApiKey = sqlx::query_as(
            r#"
            INSERT INTO _ayb_api_keys (id, user_id, app_id, prefix, secret_hash, name, scope, allowed_tables)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, user_id, app_id, prefix, secret_hash, name, scope, allowed_tables, revoked_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(opts.app_id)
        .bind(&prefix)
        .bind(&secret_hash)
        .bind(name)
        .bind(&scope)
        .bind(&opts.allowed_tables)
        .fetch_one(&self.pool)
        .await?;

        Ok((plaintext, key))
    }

    /// Authenticate a plaintext key. Revoked keys never authenticate.
    pub async fn authenticate(&self, plaintext: &str) -> Result<ApiKey> {
        if !looks_like_key(plaintext) {
            return Err(Error::InvalidToken);
        }
        let prefix = &plaintext[..LOOKUP_PREFIX_LEN];

        let candidates: Vec<ApiKey> = sqlx::query_as(
            r#"
            SELECT id, user_id, app_id, prefix, secret_hash, name, scope, allowed_tables, revoked_at, created_at
            FROM _ayb_api_keys
            WHERE prefix = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        for key in candidates {
            if self.hasher.verify(plaintext, &key.secret_hash)? {
                return Ok(key);
            }
        }
        Err(Error::InvalidToken)
    }

    /// Fetch a key by id, revoked or not (admin view)
    pub async fn get(&self, id: Uuid) -> Result<ApiKey> {
        sqlx::query_as(
            r#"
            SELECT id, user_id, app_id, prefix, secret_hash, name, scope, allowed_tables, revoked_at, created_at
            FROM _ayb_api_keys
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::ApiKeyNotFound)
    }

    /// List every key with its total count (admin view)
    pub async fn list_all(&self, page: u32, per_page: u32) -> Result<(Vec<ApiKey>, i64)> {
        let offset = (page.saturating_sub(1) as i64) * per_page as i64;
        let keys: Vec<ApiKey> = sqlx::query_as(
            r#"
            SELECT id, user_id, app_id, prefix, secret_hash, name, scope, allowed_tables, revoked_at, created_at
            FROM _ayb_api_keys
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as("SELECT count(*) FROM _ayb_api_keys")
            .fetch_one(&self.pool)
            .await?;

        Ok((keys, total))
    }

    /// Revoke a key. Revoking an already-revoked key is a not-found.
    pub async fn revoke(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE _ayb_api_keys SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ApiKeyNotFound);
        }
        Ok(())
    }

    /// Remove every key owned by a user (admin user delete cascade)
    pub async fn delete_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM _ayb_api_keys WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_shape() {
        let (plaintext, prefix) = generate_plaintext();
        assert_eq!(plaintext.len(), 52);
        assert!(plaintext.starts_with("ayb_"));
        assert!(plaintext[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(prefix.len(), 12);
        assert!(plaintext.starts_with(&prefix));
    }

    #[test]
    fn plaintexts_are_unique() {
        let (a, _) = generate_plaintext();
        let (b, _) = generate_plaintext();
        assert_ne!(a, b);
    }

    #[test]
    fn key_sniffing() {
        let (plaintext, _) = generate_plaintext();
        assert!(looks_like_key(&plaintext));
        assert!(!looks_like_key("ayb_short"));
        assert!(!looks_like_key("sk_live_abcdef"));
        let mut wrong_charset = plaintext.clone();
        wrong_charset.replace_range(4..5, "z");
        assert!(!looks_like_key(&wrong_charset));
    }

    #[test]
    fn scope_rules() {
        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            app_id: None,
            prefix: "ayb_0011aabb".into(),
            secret_hash: String::new(),
            name: "ci".into(),
            scope: "readonly".into(),
            allowed_tables: vec!["users".into()],
            revoked_at: None,
            created_at: Utc::now(),
        };
        assert!(!key.can_write());
        assert!(key.table_allowed("users"));
        assert!(!key.table_allowed("orders"));
        assert!(key.is_active());

        let all = ApiKey {
            scope: "*".into(),
            allowed_tables: vec![],
            ..key.clone()
        };
        assert!(all.can_write());
        assert!(all.table_allowed("anything"));
    }

    #[test]
    fn plaintext_never_serialized() {
        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            app_id: None,
            prefix: "ayb_0011aabb".into(),
            secret_hash: "$argon2id$secret".into(),
            name: "ci".into(),
            scope: "*".into(),
            allowed_tables: vec![],
            revoked_at: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&key).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("secret_hash"));
        assert!(json.contains("ayb_0011aabb"));
    }
}
