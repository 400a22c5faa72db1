//! SMS outbox and delivery-status tracking
//!
//! The row is inserted before the provider is called: a message we
//! cannot audit is never sent. Delivery-status updates are monotone by
//! rank; terminal statuses share the top rank and may overwrite each
//! other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SmsConfig;
use crate::error::{Error, Result};
use crate::messaging::provider::SmsProvider;
use crate::validate;

/// Maximum message body length
pub const MAX_BODY_CHARS: usize = 1600;

/// Rank of a delivery status in the monotone ordering.
///
/// `None` means the status string is unknown and must not mutate the row.
pub fn status_rank(status: &str) -> Option<u8> {
    match status {
        "pending" => Some(0),
        "accepted" => Some(1),
        "queued" => Some(2),
        "sending" => Some(3),
        "sent" => Some(4),
        // terminal statuses share the top rank
        "delivered" | "undelivered" | "failed" | "canceled" => Some(5),
        _ => None,
    }
}

/// Whether a rank transition is allowed
pub fn transition_allowed(from: &str, to: &str) -> bool {
    match (status_rank(from), status_rank(to)) {
        (Some(from_rank), Some(to_rank)) => to_rank >= from_rank,
        _ => false,
    }
}

/// An outbox row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SmsMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub to_number: String,
    pub body: String,
    pub provider: String,
    pub provider_message_id: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SMS_COLUMNS: &str = "id, user_id, to_number, body, provider, provider_message_id, \
                           status, error_message, created_at, updated_at";

/// SMS service: outbox persistence plus the provider call
#[derive(Clone)]
pub struct SmsService {
    pool: PgPool,
    provider: Option<Arc<dyn SmsProvider>>,
    provider_name: String,
    allowed_country_codes: Vec<String>,
}

impl SmsService {
    /// Create the service
    pub fn new(pool: PgPool, provider: Option<Arc<dyn SmsProvider>>, config: &SmsConfig) -> Self {
        Self {
            pool,
            provider,
            provider_name: config.provider.clone(),
            allowed_country_codes: config.allowed_country_codes.clone(),
        }
    }

    /// Send one message.
    ///
    /// Validates destination and body, inserts a `pending` row, then
    /// calls the provider. Provider failure marks the row `failed` and
    /// propagates; the provider is never called when the insert failed.
    pub async fn send(&self, user_id: Uuid, to: &str, body: &str) -> Result<SmsMessage> {
        let to = validate::e164(to)?;
        if !validate::country_allowed(&to, &self.allowed_country_codes) {
            return Err(Error::Forbidden(format!(
                "destination country not allowed for {to}"
            )));
        }
        if body.is_empty() {
            return Err(Error::bad_request("message body is required"));
        }
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(Error::bad_request(format!(
                "message body exceeds {MAX_BODY_CHARS} characters"
            )));
        }
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| Error::ServiceUnavailable("sms provider not configured".into()))?;

        let sql = format!(
            r#"
            INSERT INTO _ayb_sms_messages (id, user_id, to_number, body, provider, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING {SMS_COLUMNS}
            "#
        );
        let message: SmsMessage = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&to)
            .bind(body)
            .bind(&self.provider_name)
            .fetch_one(&self.pool)
            .await?;

        match provider.send(&to, body).await {
            Ok(accepted) => {
                let sql = format!(
                    r#"
                    UPDATE _ayb_sms_messages
                    SET provider_message_id = $2, status = $3, updated_at = now()
                    WHERE id = $1
                    RETURNING {SMS_COLUMNS}
                    "#
                );
                let status = if status_rank(&accepted.status).is_some() {
                    accepted.status
                } else {
                    "accepted".to_string()
                };
                Ok(sqlx::query_as(&sql)
                    .bind(message.id)
                    .bind(&accepted.message_id)
                    .bind(&status)
                    .fetch_one(&self.pool)
                    .await?)
            }
            Err(e) => {
                sqlx::query(
                    "UPDATE _ayb_sms_messages SET status = 'failed', error_message = $2, updated_at = now() WHERE id = $1",
                )
                .bind(message.id)
                .bind(e.to_string())
                .execute(&self.pool)
                .await?;
                Err(e)
            }
        }
    }

    /// Apply a delivery-status callback.
    ///
    /// Unknown message ids and rank regressions are no-ops; the webhook
    /// endpoint answers 200 either way so the provider stops retrying.
    pub async fn apply_status(&self, provider_message_id: &str, status: &str) -> Result<bool> {
        if status_rank(status).is_none() {
            return Ok(false);
        }

        let current: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, status FROM _ayb_sms_messages WHERE provider_message_id = $1",
        )
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, current_status)) = current else {
            return Ok(false);
        };
        if !transition_allowed(&current_status, status) {
            return Ok(false);
        }

        sqlx::query("UPDATE _ayb_sms_messages SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    /// Fetch a message for its owner; other users' ids read as not-found
    pub async fn get_for_user(&self, user_id: Uuid, id: Uuid) -> Result<SmsMessage> {
        let sql = format!(
            "SELECT {SMS_COLUMNS} FROM _ayb_sms_messages WHERE id = $1 AND user_id = $2"
        );
        sqlx::query_as(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("message not found".into()))
    }

    /// List a user's messages
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<SmsMessage>, i64)> {
        let offset = (page.saturating_sub(1) as i64) * per_page as i64;
        let sql = format!(
            r#"
            SELECT {SMS_COLUMNS} FROM _ayb_sms_messages
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let messages: Vec<SmsMessage> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(per_page as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let (total,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM _ayb_sms_messages WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok((messages, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_are_ordered() {
        let ordered = ["pending", "accepted", "queued", "sending", "sent", "delivered"];
        for pair in ordered.windows(2) {
            assert!(
                status_rank(pair[0]).unwrap() < status_rank(pair[1]).unwrap(),
                "{} < {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn unknown_statuses_have_no_rank() {
        assert!(status_rank("exploded").is_none());
        assert!(status_rank("").is_none());
        assert!(status_rank("DELIVERED").is_none());
    }

    #[test]
    fn forward_transitions_allowed() {
        assert!(transition_allowed("pending", "queued"));
        assert!(transition_allowed("queued", "sent"));
        assert!(transition_allowed("sent", "delivered"));
        assert!(transition_allowed("pending", "failed"));
    }

    #[test]
    fn regressions_rejected() {
        assert!(!transition_allowed("sent", "queued"));
        assert!(!transition_allowed("delivered", "sending"));
        assert!(!transition_allowed("delivered", "pending"));
    }

    #[test]
    fn terminal_statuses_may_swap() {
        assert!(transition_allowed("delivered", "undelivered"));
        assert!(transition_allowed("failed", "delivered"));
        assert!(transition_allowed("undelivered", "failed"));
    }

    #[test]
    fn same_rank_is_idempotent() {
        assert!(transition_allowed("queued", "queued"));
        assert!(transition_allowed("delivered", "delivered"));
    }

    #[test]
    fn unknown_participants_block_transition() {
        assert!(!transition_allowed("warp", "delivered"));
        assert!(!transition_allowed("queued", "warp"));
    }
}
