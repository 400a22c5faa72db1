//! Webhook registrations and the delivery log

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::realtime::ChangeEvent;

/// Delivery retention window
pub const RETENTION_DAYS: i64 = 7;

/// A webhook registration
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: Uuid,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// Tables this webhook wants; empty means all
    pub tables: Vec<String>,
    /// Actions this webhook wants (`create|update|delete`); empty means all
    pub events: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Webhook {
    /// Whether this webhook wants the given event
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.active
            && (self.tables.is_empty() || self.tables.iter().any(|t| t == &event.table))
            && (self.events.is_empty()
                || self.events.iter().any(|e| e == event.action.as_str()))
    }
}

/// Delivery lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Abandoned,
}

/// One (webhook, event) delivery with its attempt history
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub last_response_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const DELIVERY_COLUMNS: &str =
    "id, webhook_id, payload, attempts, next_attempt_at, status, last_response_code, created_at, updated_at";

/// Webhook and delivery storage
#[derive(Clone)]
pub struct WebhookStore {
    pool: PgPool,
}

impl WebhookStore {
    /// Create the store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a webhook
    pub async fn create(
        &self,
        url: &str,
        secret: &str,
        tables: Vec<String>,
        events: Vec<String>,
    ) -> Result<Webhook> {
        for event in &events {
            if !matches!(event.as_str(), "create" | "update" | "delete") {
                return Err(Error::bad_request(format!(
                    "event filter must be create, update or delete, got {event:?}"
                )));
            }
        }
        let webhook: Webhook = sqlx::query_as(
            r#"
            INSERT INTO _ayb_webhooks (id, url, secret, tables, events, active)
            VALUES ($1, $2, $3, $4, $5, true)
            RETURNING id, url, secret, tables, events, active, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(url)
        .bind(secret)
        .bind(&tables)
        .bind(&events)
        .fetch_one(&self.pool)
        .await?;
        Ok(webhook)
    }

    /// Fetch one webhook
    pub async fn get(&self, id: Uuid) -> Result<Webhook> {
        sqlx::query_as(
            "SELECT id, url, secret, tables, events, active, created_at FROM _ayb_webhooks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("webhook not found".into()))
    }

    /// Every active webhook
    pub async fn list_active(&self) -> Result<Vec<Webhook>> {
        Ok(sqlx::query_as(
            "SELECT id, url, secret, tables, events, active, created_at FROM _ayb_webhooks WHERE active",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// All webhooks (admin view)
    pub async fn list(&self) -> Result<Vec<Webhook>> {
        Ok(sqlx::query_as(
            "SELECT id, url, secret, tables, events, active, created_at FROM _ayb_webhooks ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Delete a webhook and its deliveries
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM _ayb_webhook_deliveries WHERE webhook_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM _ayb_webhooks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("webhook not found".into()));
        }
        Ok(())
    }

    /// Insert a pending delivery row for an event
    pub async fn insert_delivery(
        &self,
        webhook_id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<Delivery> {
        let sql = format!(
            r#"
            INSERT INTO _ayb_webhook_deliveries (id, webhook_id, payload, attempts, next_attempt_at, status)
            VALUES ($1, $2, $3, 0, now(), 'pending')
            RETURNING {DELIVERY_COLUMNS}
            "#
        );
        Ok(sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(webhook_id)
            .bind(payload)
            .fetch_one(&self.pool)
            .await?)
    }

    /// Fetch one delivery
    pub async fn get_delivery(&self, id: Uuid) -> Result<Delivery> {
        let sql =
            format!("SELECT {DELIVERY_COLUMNS} FROM _ayb_webhook_deliveries WHERE id = $1");
        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("delivery not found".into()))
    }

    /// Record an attempt's outcome
    pub async fn record_attempt(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        response_code: Option<i32>,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE _ayb_webhook_deliveries
            SET attempts = attempts + 1,
                status = $2,
                last_response_code = $3,
                next_attempt_at = COALESCE($4, next_attempt_at),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(response_code)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Pending deliveries that are due now
    pub async fn due_deliveries(&self, limit: i64) -> Result<Vec<Delivery>> {
        let sql = format!(
            r#"
            SELECT {DELIVERY_COLUMNS}
            FROM _ayb_webhook_deliveries
            WHERE status = 'pending' AND next_attempt_at <= now()
            ORDER BY next_attempt_at
            LIMIT $1
            "#
        );
        Ok(sqlx::query_as(&sql).bind(limit).fetch_all(&self.pool).await?)
    }

    /// Recent deliveries for the admin view
    pub async fn list_deliveries(&self, limit: i64) -> Result<Vec<Delivery>> {
        let sql = format!(
            "SELECT {DELIVERY_COLUMNS} FROM _ayb_webhook_deliveries ORDER BY created_at DESC LIMIT $1"
        );
        Ok(sqlx::query_as(&sql).bind(limit).fetch_all(&self.pool).await?)
    }

    /// Delete delivery rows past the retention window
    pub async fn prune(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM _ayb_webhook_deliveries WHERE created_at < now() - make_interval(days => $1)",
        )
        .bind(RETENTION_DAYS as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::Action;

    fn hook(tables: Vec<&str>, events: Vec<&str>, active: bool) -> Webhook {
        Webhook {
            id: Uuid::new_v4(),
            url: "https://example.com/hook".into(),
            secret: "s".into(),
            tables: tables.into_iter().map(String::from).collect(),
            events: events.into_iter().map(String::from).collect(),
            active,
            created_at: Utc::now(),
        }
    }

    fn event(table: &str, action: Action) -> ChangeEvent {
        ChangeEvent {
            id: 1,
            action,
            table: table.into(),
            record: serde_json::json!({}),
        }
    }

    #[test]
    fn matching_by_table_and_event() {
        let users_creates = hook(vec!["users"], vec!["create"], true);
        assert!(users_creates.matches(&event("users", Action::Create)));
        assert!(!users_creates.matches(&event("users", Action::Delete)));
        assert!(!users_creates.matches(&event("logs", Action::Create)));
    }

    #[test]
    fn empty_filters_match_everything() {
        let all = hook(vec![], vec![], true);
        assert!(all.matches(&event("users", Action::Create)));
        assert!(all.matches(&event("logs", Action::Delete)));
    }

    #[test]
    fn inactive_never_matches() {
        let inactive = hook(vec![], vec![], false);
        assert!(!inactive.matches(&event("users", Action::Create)));
    }

    #[test]
    fn secret_not_serialized() {
        let webhook = hook(vec![], vec![], true);
        let json = serde_json::to_string(&webhook).unwrap();
        assert!(!json.contains("\"secret\""));
    }
}
