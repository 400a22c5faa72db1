//! Persistent job queue with atomic claims and retry policy
//!
//! Jobs are rows in `_ayb_jobs`. The claim loop takes the next due
//! `queued` row with `FOR UPDATE SKIP LOCKED`, flips it to `running` in
//! the same transaction, and hands the payload to the handler registered
//! for its type.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

/// A persisted job
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str = "id, job_type, payload, state, attempts, max_attempts, last_error, \
                           scheduled_at, started_at, completed_at, canceled_at, created_at";

/// Options accepted at enqueue time
#[derive(Debug, Default)]
pub struct EnqueueOptions {
    /// When the job becomes due; defaults to now
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Attempt budget; defaults to 3
    pub max_attempts: Option<i32>,
}

/// Work executed for a job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job; an error consumes one attempt
    async fn run(&self, payload: serde_json::Value) -> Result<()>;
}

/// Counts by state for the admin stats endpoint
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub canceled: i64,
}

/// Delay before a failed attempt is retried
pub fn retry_backoff(attempts: i32) -> Duration {
    let exp = attempts.clamp(0, 10) as u32;
    let secs = 5u64.saturating_mul(1u64 << exp).min(3600);
    Duration::from_secs(secs)
}

/// The job engine
#[derive(Clone)]
pub struct JobEngine {
    pool: PgPool,
    handlers: Arc<HashMap<String, Arc<dyn JobHandler>>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl JobEngine {
    /// Create an engine with its handler registry
    pub fn new(pool: PgPool, handlers: HashMap<String, Arc<dyn JobHandler>>) -> Self {
        Self {
            pool,
            handlers: Arc::new(handlers),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Insert a `queued` row
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<Job> {
        let sql = format!(
            r#"
            INSERT INTO _ayb_jobs (id, job_type, payload, state, attempts, max_attempts, scheduled_at)
            VALUES ($1, $2, $3, 'queued', 0, $4, $5)
            RETURNING {JOB_COLUMNS}
            "#
        );
        Ok(sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(job_type)
            .bind(&payload)
            .bind(opts.max_attempts.unwrap_or(3).max(1))
            .bind(opts.scheduled_at.unwrap_or_else(Utc::now))
            .fetch_one(&self.pool)
            .await?)
    }

    /// Atomically claim the next due job, flipping it to `running`
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM _ayb_jobs
            WHERE state = 'queued' AND scheduled_at <= now()
            ORDER BY scheduled_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id,)) = claimed else {
            return Ok(None);
        };

        let sql = format!(
            r#"
            UPDATE _ayb_jobs
            SET state = 'running', started_at = now()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        );
        let job: Job = sqlx::query_as(&sql).bind(id).fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(Some(job))
    }

    async fn finish(&self, job: &Job, outcome: std::result::Result<(), Error>) -> Result<()> {
        match outcome {
            Ok(()) => {
                sqlx::query(
                    "UPDATE _ayb_jobs SET state = 'completed', attempts = attempts + 1, completed_at = now() WHERE id = $1",
                )
                .bind(job.id)
                .execute(&self.pool)
                .await?;
            }
            Err(e) => {
                let message = e.to_string();
                if job.attempts + 1 < job.max_attempts {
                    let next = Utc::now()
                        + ChronoDuration::from_std(retry_backoff(job.attempts + 1))
                            .unwrap_or_else(|_| ChronoDuration::seconds(3600));
                    sqlx::query(
                        r#"
                        UPDATE _ayb_jobs
                        SET state = 'queued', attempts = attempts + 1, last_error = $2, scheduled_at = $3
                        WHERE id = $1
                        "#,
                    )
                    .bind(job.id)
                    .bind(&message)
                    .bind(next)
                    .execute(&self.pool)
                    .await?;
                } else {
                    sqlx::query(
                        r#"
                        UPDATE _ayb_jobs
                        SET state = 'failed', attempts = attempts + 1, last_error = $2, completed_at = now()
                        WHERE id = $1
                        "#,
                    )
                    .bind(job.id)
                    .bind(&message)
                    .execute(&self.pool)
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Run the claim loop until shutdown
    pub fn start(&self, poll_interval: Duration, workers: usize) -> JoinHandle<()> {
        let engine = self.clone();
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = engine.shutdown.cancelled() => break,
                    _ = tick.tick() => {}
                }

                // Drain everything due right now, bounded by the worker pool.
                loop {
                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => break,
                    };
                    let job = match engine.claim_next().await {
                        Ok(Some(job)) => job,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "job claim failed");
                            break;
                        }
                    };
                    let engine2 = engine.clone();
                    engine.tracker.spawn(async move {
                        let _permit = permit;
                        let outcome = match engine2.handlers.get(&job.job_type) {
                            Some(handler) => handler.run(job.payload.clone()).await,
                            None => Err(Error::internal(format!(
                                "no handler registered for job type {:?}",
                                job.job_type
                            ))),
                        };
                        if let Err(e) = engine2.finish(&job, outcome).await {
                            tracing::error!(job_id = %job.id, error = %e, "failed to record job outcome");
                        }
                    });
                }
            }
        })
    }

    /// Stop claiming and wait for in-flight handlers, up to the timeout
    pub async fn stop(&self, timeout: Duration) {
        self.shutdown.cancel();
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            tracing::warn!("job engine shutdown timed out with handlers in flight");
        }
    }

    /// Fetch one job
    pub async fn get(&self, id: Uuid) -> Result<Job> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM _ayb_jobs WHERE id = $1");
        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::JobNotFound)
    }

    /// List jobs, optionally filtered by state
    pub async fn list(
        &self,
        state: Option<JobState>,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Job>, i64)> {
        let offset = (page.saturating_sub(1) as i64) * per_page as i64;
        let (jobs, total) = match state {
            Some(state) => {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM _ayb_jobs WHERE state = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
                );
                let jobs: Vec<Job> = sqlx::query_as(&sql)
                    .bind(state)
                    .bind(per_page as i64)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                let (total,): (i64,) =
                    sqlx::query_as("SELECT count(*) FROM _ayb_jobs WHERE state = $1")
                        .bind(state)
                        .fetch_one(&self.pool)
                        .await?;
                (jobs, total)
            }
            None => {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM _ayb_jobs ORDER BY created_at DESC LIMIT $1 OFFSET $2"
                );
                let jobs: Vec<Job> = sqlx::query_as(&sql)
                    .bind(per_page as i64)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;
                let (total,): (i64,) = sqlx::query_as("SELECT count(*) FROM _ayb_jobs")
                    .fetch_one(&self.pool)
                    .await?;
                (jobs, total)
            }
        };
        Ok((jobs, total))
    }

    /// Cancel a job; only valid from `queued`
    pub async fn cancel(&self, id: Uuid) -> Result<Job> {
        let sql = format!(
            r#"
            UPDATE _ayb_jobs
            SET state = 'canceled', canceled_at = now()
            WHERE id = $1 AND state = 'queued'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let updated: Option<Job> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(job) => Ok(job),
            None => {
                // distinguish missing from wrong-state
                self.get(id).await?;
                Err(Error::Conflict("not in queued state".into()))
            }
        }
    }

    /// Re-queue a failed job with a fresh attempt budget
    pub async fn retry_now(&self, id: Uuid) -> Result<Job> {
        let sql = format!(
            r#"
            UPDATE _ayb_jobs
            SET state = 'queued', attempts = 0, last_error = NULL,
                scheduled_at = now(), started_at = NULL, completed_at = NULL
            WHERE id = $1 AND state = 'failed'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let updated: Option<Job> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(job) => Ok(job),
            None => {
                self.get(id).await?;
                Err(Error::Conflict("not in failed state".into()))
            }
        }
    }

    /// Aggregate counts by state
    pub async fn stats(&self) -> Result<JobStats> {
        let rows: Vec<(JobState, i64)> =
            sqlx::query_as("SELECT state, count(*) FROM _ayb_jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await?;
        let mut stats = JobStats::default();
        for (state, count) in rows {
            match state {
                JobState::Queued => stats.queued = count,
                JobState::Running => stats.running = count,
                JobState::Completed => stats.completed = count,
                JobState::Failed => stats.failed = count,
                JobState::Canceled => stats.canceled = count,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(retry_backoff(0), Duration::from_secs(5));
        assert_eq!(retry_backoff(1), Duration::from_secs(10));
        assert_eq!(retry_backoff(2), Duration::from_secs(20));
        assert_eq!(retry_backoff(3), Duration::from_secs(40));
        assert_eq!(retry_backoff(20), Duration::from_secs(3600));
        // negative attempts behave like zero
        assert_eq!(retry_backoff(-1), Duration::from_secs(5));
    }

    #[test]
    fn state_serialization() {
        assert_eq!(serde_json::to_string(&JobState::Queued).unwrap(), "\"queued\"");
        assert_eq!(
            serde_json::to_string(&JobState::Canceled).unwrap(),
            "\"canceled\""
        );
    }

    #[test]
    fn stats_shape() {
        let stats = JobStats {
            queued: 2,
            failed: 1,
            ..JobStats::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["queued"], 2);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["completed"], 0);
    }
}
