//! Webhook delivery worker pool
//!
//! Enqueue writes a durable delivery row and pushes the id onto a
//! bounded in-memory queue; workers drain it into parallel signed POSTs.
//! A due-poller re-feeds retries (and anything left over from a previous
//! process), and a pruner deletes rows past retention.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::realtime::ChangeEvent;
use crate::webhooks::store::{DeliveryStatus, WebhookStore};

/// Maximum delivery attempts before a delivery is abandoned
pub const MAX_ATTEMPTS: i32 = 6;

/// Signature header name
pub const SIGNATURE_HEADER: &str = "X-Ayb-Signature";

/// In-memory queue capacity
const QUEUE_CAPACITY: usize = 1024;

/// Due-poller interval
const POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Pruner interval when the job engine does not own pruning
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

/// What one HTTP attempt means for the delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx
    Delivered,
    /// 4xx other than 429: terminal
    Failed,
    /// 429, 5xx, or network error
    Retry,
}

/// Classify a response status (`None` is a network error)
pub fn classify(status: Option<u16>) -> Outcome {
    match status {
        Some(code) if (200..300).contains(&code) => Outcome::Delivered,
        Some(429) => Outcome::Retry,
        Some(code) if (400..500).contains(&code) => Outcome::Failed,
        _ => Outcome::Retry,
    }
}

/// Backoff before attempt `attempts + 1`, with ±10% jitter.
///
/// Base timings: 1s, 5s, 30s, 2m, 10m, 1h.
pub fn backoff(attempts: i32) -> Duration {
    const STEPS: [u64; 6] = [1, 5, 30, 120, 600, 3600];
    let index = (attempts.max(0) as usize).min(STEPS.len() - 1);
    let base = STEPS[index] as f64;
    let jitter: f64 = 0.9 + rand::random::<f64>() * 0.2;
    Duration::from_secs_f64(base * jitter)
}

/// Compute the `sha256=<hex>` signature for a body
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// The dispatcher handle shared with CRUD handlers
#[derive(Clone)]
pub struct Dispatcher {
    store: WebhookStore,
    tx: mpsc::Sender<Uuid>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Spawn the worker pool, the due-poller and (unless the job engine
    /// owns pruning) the pruner. Returns the handle plus the task joins.
    pub fn start(
        store: WebhookStore,
        workers: usize,
        jobs_own_pruning: bool,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel::<Uuid>(QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();
        let dispatcher = Self {
            store: store.clone(),
            tx: tx.clone(),
            shutdown: shutdown.clone(),
        };

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");

        let mut handles = Vec::new();

        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));
        for _ in 0..workers.max(1) {
            let store = store.clone();
            let client = client.clone();
            let rx = rx.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => None,
                            id = rx.recv() => id,
                        }
                    };
                    let Some(id) = next else { break };
                    if let Err(e) = process_delivery(&store, &client, id).await {
                        tracing::warn!(delivery_id = %id, error = %e, "webhook delivery attempt errored");
                    }
                }
            }));
        }

        // Due-poller: retries and deliveries stranded by a restart.
        {
            let store = store.clone();
            let tx = tx.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(POLL_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tick.tick() => {}
                    }
                    match store.due_deliveries(100).await {
                        Ok(due) => {
                            for delivery in due {
                                let _ = tx.try_send(delivery.id);
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "due-delivery poll failed"),
                    }
                }
            }));
        }

        if !jobs_own_pruning {
            let store = store.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(PRUNE_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tick.tick() => {}
                    }
                    match store.prune().await {
                        Ok(n) if n > 0 => {
                            tracing::info!(pruned = n, "pruned webhook deliveries")
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "delivery prune failed"),
                    }
                }
            }));
        }

        (dispatcher, handles)
    }

    /// Enqueue an event: write delivery rows for every matching webhook
    /// and hand them to the workers. Synchronous only up to the row
    /// insert; a full queue leaves the row for the due-poller.
    pub async fn enqueue(&self, event: &ChangeEvent) -> Result<usize> {
        let webhooks = self.store.list_active().await?;
        let payload = serde_json::json!({
            "action": event.action.as_str(),
            "table": event.table,
            "record": event.record,
        });

        let mut enqueued = 0;
        for webhook in webhooks.iter().filter(|w| w.matches(event)) {
            let delivery = self.store.insert_delivery(webhook.id, &payload).await?;
            let _ = self.tx.try_send(delivery.id);
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Stop accepting work and cancel the background tasks
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

async fn process_delivery(
    store: &WebhookStore,
    client: &reqwest::Client,
    id: Uuid,
) -> Result<()> {
    let delivery = store.get_delivery(id).await?;
    if delivery.status != DeliveryStatus::Pending {
        return Ok(());
    }
    let webhook = store.get(delivery.webhook_id).await?;

    let body = serde_json::to_vec(&delivery.payload)
        .map_err(|e| crate::error::Error::internal(format!("payload encode: {e}")))?;
    let signature = sign(&webhook.secret, &body);

    let response = client
        .post(&webhook.url)
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(body)
        .send()
        .await;

    let status = response.as_ref().ok().map(|r| r.status().as_u16());
    let code = status.map(|s| s as i32);

    match classify(status) {
        Outcome::Delivered => {
            store
                .record_attempt(id, DeliveryStatus::Delivered, code, None)
                .await
        }
        Outcome::Failed => {
            store
                .record_attempt(id, DeliveryStatus::Failed, code, None)
                .await
        }
        Outcome::Retry => {
            let attempts_after = delivery.attempts + 1;
            if attempts_after >= MAX_ATTEMPTS {
                store
                    .record_attempt(id, DeliveryStatus::Abandoned, code, None)
                    .await
            } else {
                let next: DateTime<Utc> = Utc::now()
                    + ChronoDuration::from_std(backoff(attempts_after))
                        .unwrap_or_else(|_| ChronoDuration::seconds(3600));
                store
                    .record_attempt(id, DeliveryStatus::Pending, code, Some(next))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(classify(Some(200)), Outcome::Delivered);
        assert_eq!(classify(Some(204)), Outcome::Delivered);
        assert_eq!(classify(Some(299)), Outcome::Delivered);
        assert_eq!(classify(Some(400)), Outcome::Failed);
        assert_eq!(classify(Some(404)), Outcome::Failed);
        assert_eq!(classify(Some(410)), Outcome::Failed);
        assert_eq!(classify(Some(429)), Outcome::Retry);
        assert_eq!(classify(Some(500)), Outcome::Retry);
        assert_eq!(classify(Some(503)), Outcome::Retry);
        assert_eq!(classify(None), Outcome::Retry);
    }

    #[test]
    fn backoff_follows_schedule_with_jitter() {
        let expected = [1.0, 5.0, 30.0, 120.0, 600.0, 3600.0];
        for (attempt, base) in expected.iter().enumerate() {
            let d = backoff(attempt as i32).as_secs_f64();
            assert!(d >= base * 0.9 && d <= base * 1.1, "attempt {attempt}: {d}");
        }
        // past the table it stays capped at an hour
        let d = backoff(10).as_secs_f64();
        assert!(d >= 3600.0 * 0.9 && d <= 3600.0 * 1.1);
    }

    #[test]
    fn signature_is_keyed_and_deterministic() {
        let body = br#"{"action":"create","table":"users","record":{}}"#;
        let a = sign("secret-1", body);
        let b = sign("secret-1", body);
        let c = sign("secret-2", body);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("sha256="));
        assert_eq!(a.len(), "sha256=".len() + 64);
    }
}
