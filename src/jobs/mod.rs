//! Background work: the persistent job queue and its cron scheduler

pub mod engine;
pub mod scheduler;

pub use engine::{EnqueueOptions, Job, JobEngine, JobHandler, JobState, JobStats};
pub use scheduler::{Schedule, ScheduleUpdate, Scheduler};

use crate::webhooks::WebhookStore;
use async_trait::async_trait;

/// Job type owning webhook delivery pruning when the engine is enabled
pub const WEBHOOK_PRUNE_JOB: &str = "webhook_delivery_prune";

/// Handler for [`WEBHOOK_PRUNE_JOB`]
pub struct WebhookPruneHandler {
    store: WebhookStore,
}

impl WebhookPruneHandler {
    /// Create the handler
    pub fn new(store: WebhookStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobHandler for WebhookPruneHandler {
    async fn run(&self, _payload: serde_json::Value) -> crate::error::Result<()> {
        let pruned = self.store.prune().await?;
        if pruned > 0 {
            tracing::info!(pruned, "pruned webhook deliveries");
        }
        Ok(())
    }
}
