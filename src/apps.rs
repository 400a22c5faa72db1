//! Apps: the grouping entity for OAuth clients and API keys
//!
//! An app carries the rate-limit budget used by the per-app sliding
//! window limiter.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};

/// An application record
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_user_id: Option<Uuid>,
    /// Requests per second for the sliding window limiter
    pub rate_limit_rps: i32,
    /// Window length in seconds for the sliding window limiter
    pub rate_limit_window_secs: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const APP_COLUMNS: &str = "id, name, description, owner_user_id, rate_limit_rps, \
                           rate_limit_window_secs, created_at, updated_at";

/// App storage
#[derive(Clone)]
pub struct AppStore {
    pool: PgPool,
}

impl AppStore {
    /// Create the store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an app
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        owner_user_id: Option<Uuid>,
        rate_limit_rps: i32,
        rate_limit_window_secs: i32,
    ) -> Result<App> {
        if name.trim().is_empty() {
            return Err(Error::bad_request("app name is required"));
        }
        let sql = format!(
            r#"
            INSERT INTO _ayb_apps (id, name, description, owner_user_id, rate_limit_rps, rate_limit_window_secs)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {APP_COLUMNS}
            "#
        );
        Ok(sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(description)
            .bind(owner_user_id)
            .bind(rate_limit_rps.max(1))
            .bind(rate_limit_window_secs.max(1))
            .fetch_one(&self.pool)
            .await?)
    }

    /// Fetch one app
    pub async fn get(&self, id: Uuid) -> Result<App> {
        let sql = format!("SELECT {APP_COLUMNS} FROM _ayb_apps WHERE id = $1");
        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::AppNotFound)
    }

    /// List apps with total
    pub async fn list(&self, page: u32, per_page: u32) -> Result<(Vec<App>, i64)> {
        let offset = (page.saturating_sub(1) as i64) * per_page as i64;
        let sql = format!(
            "SELECT {APP_COLUMNS} FROM _ayb_apps ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        );
        let apps: Vec<App> = sqlx::query_as(&sql)
            .bind(per_page as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let (total,): (i64,) = sqlx::query_as("SELECT count(*) FROM _ayb_apps")
            .fetch_one(&self.pool)
            .await?;
        Ok((apps, total))
    }

    /// Update an app; `None` fields are left untouched
    pub async fn update(
        &self,
        id: Uuid,
        name: Option<String>,
        description: Option<String>,
        rate_limit_rps: Option<i32>,
        rate_limit_window_secs: Option<i32>,
    ) -> Result<App> {
        let existing = self.get(id).await?;
        let sql = format!(
            r#"
            UPDATE _ayb_apps
            SET name = $2, description = $3, rate_limit_rps = $4,
                rate_limit_window_secs = $5, updated_at = now()
            WHERE id = $1
            RETURNING {APP_COLUMNS}
            "#
        );
        Ok(sqlx::query_as(&sql)
            .bind(id)
            .bind(name.unwrap_or(existing.name))
            .bind(description.or(existing.description))
            .bind(rate_limit_rps.unwrap_or(existing.rate_limit_rps).max(1))
            .bind(
                rate_limit_window_secs
                    .unwrap_or(existing.rate_limit_window_secs)
                    .max(1),
            )
            .fetch_one(&self.pool)
            .await?)
    }

    /// Delete an app along with its OAuth clients; API keys lose their
    /// app binding but stay valid.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM _ayb_oauth_clients WHERE app_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE _ayb_api_keys SET app_id = NULL WHERE app_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM _ayb_apps WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::AppNotFound);
        }
        tx.commit().await?;
        Ok(())
    }
}
