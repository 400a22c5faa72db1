//! OAuth client registry
//!
//! Confidential clients receive exactly one 64-char secret at creation
//! (hash at rest); public clients never carry a secret, and rotating one
//! is an error by construction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::password::PasswordHasher;
use crate::error::{Error, Result};
use crate::validate;

/// Public client-id prefix
pub const CLIENT_ID_PREFIX: &str = "ayb_cid_";

/// Client type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ClientType {
    /// Holds a secret; may use the token endpoint with client authentication
    Confidential,
    /// Browser/native client; no secret
    Public,
}

impl ClientType {
    /// Parse from the wire value
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "confidential" => Ok(ClientType::Confidential),
            "public" => Ok(ClientType::Public),
            other => Err(Error::bad_request(format!(
                "client type must be confidential or public, got {other:?}"
            ))),
        }
    }
}

/// A registered OAuth client
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClient {
    pub id: Uuid,
    pub app_id: Uuid,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret_hash: Option<String>,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub client_type: ClientType,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Registration input after handler-level deserialization
#[derive(Debug)]
pub struct RegisterClient {
    pub app_id: Uuid,
    pub name: String,
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
}

fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

fn generate_client_id() -> String {
    let bytes: [u8; 16] = rand::random();
    format!("{CLIENT_ID_PREFIX}{}", hex::encode(bytes))
}

/// Validate registration/update inputs before touching the DB
fn validate_client_inputs(redirect_uris: &[String], scopes: &[String]) -> Result<()> {
    if redirect_uris.is_empty() {
        return Err(Error::bad_request("at least one redirect uri is required"));
    }
    for uri in redirect_uris {
        validate::redirect_uri(uri)?;
    }
    for scope in scopes {
        validate::scope(scope)?;
    }
    Ok(())
}

/// OAuth client storage over the shared pool
#[derive(Clone)]
pub struct OAuthClientStore {
    pool: PgPool,
    hasher: PasswordHasher,
}

impl OAuthClientStore {
    /// Create a store
    pub fn new(pool: PgPool, hasher: PasswordHasher) -> Self {
        Self { pool, hasher }
    }

    /// Register a client. Returns the record and, for confidential
    /// clients, the one-time plaintext secret.
    pub async fn register(&self, input: RegisterClient) -> Result<(OAuthClient, Option<String>)> {
        validate_client_inputs(&input.redirect_uris, &input.scopes)?;

        let app: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM _ayb_apps WHERE id = $1")
            .bind(input.app_id)
            .fetch_optional(&self.pool)
            .await?;
        if app.is_none() {
            return Err(Error::AppNotFound);
        }

        let secret = match input.client_type {
            ClientType::Confidential => Some(generate_secret()),
            ClientType::Public => None,
        };
        let secret_hash = match &secret {
            Some(s) => Some(self.hasher.hash_secret(s)?),
            None => None,
        };

        let client: OAuthClient = sqlx::query_as(
            r#"
            INSERT INTO _ayb_oauth_clients
                (id, app_id, client_id, client_secret_hash, name, redirect_uris, scopes, client_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, app_id, client_id, client_secret_hash, name, redirect_uris, scopes,
                      client_type, revoked_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.app_id)
        .bind(generate_client_id())
        .bind(&secret_hash)
        .bind(&input.name)
        .bind(&input.redirect_uris)
        .bind(&input.scopes)
        .bind(input.client_type)
        .fetch_one(&self.pool)
        .await?;

        Ok((client, secret))
    }

    /// Fetch by record id
    pub async fn get(&self, id: Uuid) -> Result<OAuthClient> {
        self.fetch_optional("id", id.to_string())
            .await?
            .ok_or(Error::OAuthClientNotFound)
    }

    /// Fetch by public client id
    pub async fn get_by_client_id(&self, client_id: &str) -> Result<OAuthClient> {
        self.fetch_optional("client_id", client_id.to_string())
            .await?
            .ok_or(Error::OAuthClientNotFound)
    }

    async fn fetch_optional(&self, column: &str, value: String) -> Result<Option<OAuthClient>> {
        let sql = format!(
            r#"
            SELECT id, app_id, client_id, client_secret_hash, name, redirect_uris, scopes,
                   client_type, revoked_at, created_at
            FROM _ayb_oauth_clients
            WHERE {column}::text = $1
            "#
        );
        Ok(sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// List all clients with total (admin view)
    pub async fn list(&self, page: u32, per_page: u32) -> Result<(Vec<OAuthClient>, i64)> {
        let offset = (page.saturating_sub(1) as i64) * per_page as i64;
        let clients: Vec<OAuthClient> = sqlx::query_as(
            r#"
            SELECT id, app_id, client_id, client_secret_hash, name, redirect_uris, scopes,
                   client_type, revoked_at, created_at
            FROM _ayb_oauth_clients
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as("SELECT count(*) FROM _ayb_oauth_clients")
            .fetch_one(&self.pool)
            .await?;

        Ok((clients, total))
    }

    /// Update name / redirect uris / scopes. Revoked clients reject updates.
    pub async fn update(
        &self,
        id: Uuid,
        name: Option<String>,
        redirect_uris: Option<Vec<String>>,
        scopes: Option<Vec<String>>,
    ) -> Result<OAuthClient> {
        let existing = self.get(id).await?;
        if existing.revoked_at.is_some() {
            return Err(Error::OAuthClientRevoked);
        }

        let redirect_uris = redirect_uris.unwrap_or(existing.redirect_uris);
        let scopes = scopes.unwrap_or(existing.scopes);
        validate_client_inputs(&redirect_uris, &scopes)?;
        let name = name.unwrap_or(existing.name);

        let client: OAuthClient = sqlx::query_as(
            r#"
            UPDATE _ayb_oauth_clients
            SET name = $2, redirect_uris = $3, scopes = $4
            WHERE id = $1
            RETURNING id, app_id, client_id, client_secret_hash, name, redirect_uris, scopes,
                      client_type, revoked_at, created_at
            "#,
        )
        .bind(id)
        .bind(&name)
        .bind(&redirect_uris)
        .bind(&scopes)
        .fetch_one(&self.pool)
        .await?;

        Ok(client)
    }

    /// Mint a replacement secret for a confidential client.
    ///
    /// Public clients fail (`public client has no secret to rotate`), as
    /// do revoked clients.
    pub async fn rotate_secret(&self, id: Uuid) -> Result<String> {
        let client = self.get(id).await?;
        if client.client_type == ClientType::Public {
            return Err(Error::OAuthClientPublicSecretRotation);
        }
        if client.revoked_at.is_some() {
            return Err(Error::OAuthClientRevoked);
        }

        let secret = generate_secret();
        let secret_hash = self.hasher.hash_secret(&secret)?;
        sqlx::query("UPDATE _ayb_oauth_clients SET client_secret_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(&secret_hash)
            .execute(&self.pool)
            .await?;

        Ok(secret)
    }

    /// Revoke a client; idempotent revoke is a not-found like API keys
    pub async fn revoke(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE _ayb_oauth_clients SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::OAuthClientNotFound);
        }
        Ok(())
    }

    /// Verify a confidential client's credentials at the token endpoint
    pub async fn verify_secret(&self, client_id: &str, secret: &str) -> Result<OAuthClient> {
        let client = self.get_by_client_id(client_id).await?;
        if client.revoked_at.is_some() {
            return Err(Error::InvalidCredentials);
        }
        match &client.client_secret_hash {
            Some(hash) if self.hasher.verify(secret, hash)? => Ok(client),
            _ => Err(Error::InvalidCredentials),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_type_parsing() {
        assert_eq!(ClientType::parse("confidential").unwrap(), ClientType::Confidential);
        assert_eq!(ClientType::parse("public").unwrap(), ClientType::Public);
        assert!(ClientType::parse("hybrid").is_err());
        assert!(ClientType::parse("").is_err());
    }

    #[test]
    fn secret_and_client_id_shapes() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));

        let client_id = generate_client_id();
        assert!(client_id.starts_with("ayb_cid_"));
        assert_eq!(client_id.len(), CLIENT_ID_PREFIX.len() + 32);
    }

    #[test]
    fn input_validation() {
        assert!(validate_client_inputs(
            &["https://app.example.com/cb".into()],
            &["readonly".into()]
        )
        .is_ok());
        // empty redirect list
        assert!(validate_client_inputs(&[], &[]).is_err());
        // plain http on a public host
        assert!(validate_client_inputs(&["http://evil.example.com/cb".into()], &[]).is_err());
        // fragment
        assert!(
            validate_client_inputs(&["https://app.example.com/cb#token".into()], &[]).is_err()
        );
        // bad scope
        assert!(validate_client_inputs(
            &["https://app.example.com/cb".into()],
            &["superuser".into()]
        )
        .is_err());
    }

    #[test]
    fn secret_never_serialized() {
        let client = OAuthClient {
            id: Uuid::new_v4(),
            app_id: Uuid::new_v4(),
            client_id: "ayb_cid_0123".into(),
            client_secret_hash: Some("$argon2id$hash".into()),
            name: "web".into(),
            redirect_uris: vec!["https://app.example.com/cb".into()],
            scopes: vec!["*".into()],
            client_type: ClientType::Confidential,
            revoked_at: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&client).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(json.contains("ayb_cid_0123"));
        assert!(json.contains("\"clientType\":\"confidential\""));
    }
}
