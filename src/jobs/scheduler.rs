//! Cron-driven schedules
//!
//! A schedule owns `(cron_expr, timezone, enabled, next_run_at)`. The
//! tick claims due schedules, enqueues a job with the schedule's payload,
//! and stores the next fire time computed from the 5-field cron
//! expression interpreted in the schedule's IANA timezone.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::Serialize;
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::jobs::engine::{EnqueueOptions, JobEngine};

/// A cron schedule row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: Uuid,
    pub name: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub cron_expr: String,
    pub timezone: String,
    pub enabled: bool,
    pub max_attempts: i32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SCHEDULE_COLUMNS: &str = "id, name, job_type, payload, cron_expr, timezone, enabled, \
                                max_attempts, next_run_at, created_at, updated_at";

/// Parse a 5-field cron expression (the `cron` crate wants seconds, so a
/// leading `0 ` is prepended) and an IANA timezone.
pub fn parse_cron(expr: &str, timezone: &str) -> Result<(CronSchedule, Tz)> {
    if expr.split_whitespace().count() != 5 {
        return Err(Error::bad_request(format!(
            "cron expression must have 5 fields, got {expr:?}"
        )));
    }
    let schedule = CronSchedule::from_str(&format!("0 {expr}"))
        .map_err(|e| Error::bad_request(format!("invalid cron expression {expr:?}: {e}")))?;
    let tz: Tz = timezone
        .parse()
        .map_err(|_| Error::bad_request(format!("invalid timezone {timezone:?}")))?;
    Ok((schedule, tz))
}

/// Next fire time strictly after `after`, in UTC
pub fn next_run(expr: &str, timezone: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let (schedule, tz) = parse_cron(expr, timezone)?;
    let local = after.with_timezone(&tz);
    schedule
        .after(&local)
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::bad_request(format!("cron expression {expr:?} never fires")))
}

/// Fields accepted on schedule update; `None` leaves a field untouched
#[derive(Debug, Default)]
pub struct ScheduleUpdate {
    pub job_type: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub cron_expr: Option<String>,
    pub timezone: Option<String>,
    pub max_attempts: Option<i32>,
}

/// Schedule storage and the scheduler tick
#[derive(Clone)]
pub struct Scheduler {
    pool: PgPool,
    engine: JobEngine,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler bound to the engine it enqueues into
    pub fn new(pool: PgPool, engine: JobEngine) -> Self {
        Self {
            pool,
            engine,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a schedule; the first `next_run_at` is computed immediately
    pub async fn create(
        &self,
        name: &str,
        job_type: &str,
        payload: serde_json::Value,
        cron_expr: &str,
        timezone: &str,
        max_attempts: i32,
    ) -> Result<Schedule> {
        let next = next_run(cron_expr, timezone, Utc::now())?;

        let sql = format!(
            r#"
            INSERT INTO _ayb_schedules
                (id, name, job_type, payload, cron_expr, timezone, enabled, max_attempts, next_run_at)
            VALUES ($1, $2, $3, $4, $5, $6, true, $7, $8)
            RETURNING {SCHEDULE_COLUMNS}
            "#
        );
        let result: std::result::Result<Schedule, sqlx::Error> = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(job_type)
            .bind(&payload)
            .bind(cron_expr)
            .bind(timezone)
            .bind(max_attempts.max(1))
            .bind(next)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(schedule) => Ok(schedule),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::Conflict(
                format!("schedule {name:?} already exists"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch one schedule
    pub async fn get(&self, id: Uuid) -> Result<Schedule> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM _ayb_schedules WHERE id = $1");
        sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::ScheduleNotFound)
    }

    /// List schedules
    pub async fn list(&self) -> Result<Vec<Schedule>> {
        let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM _ayb_schedules ORDER BY name");
        Ok(sqlx::query_as(&sql).fetch_all(&self.pool).await?)
    }

    /// Update a schedule.
    ///
    /// `next_run_at` is recomputed only when the cron expression or the
    /// timezone actually changes; edits that don't touch timing preserve
    /// the stored value bit-for-bit.
    pub async fn update(&self, id: Uuid, update: ScheduleUpdate) -> Result<Schedule> {
        let existing = self.get(id).await?;

        let cron_expr = update.cron_expr.unwrap_or_else(|| existing.cron_expr.clone());
        let timezone = update.timezone.unwrap_or_else(|| existing.timezone.clone());
        let timing_changed =
            cron_expr != existing.cron_expr || timezone != existing.timezone;

        let next_run_at = if timing_changed {
            Some(next_run(&cron_expr, &timezone, Utc::now())?)
        } else {
            // still validate what we keep
            parse_cron(&cron_expr, &timezone)?;
            existing.next_run_at
        };

        let sql = format!(
            r#"
            UPDATE _ayb_schedules
            SET job_type = $2, payload = $3, cron_expr = $4, timezone = $5,
                max_attempts = $6, next_run_at = $7, updated_at = now()
            WHERE id = $1
            RETURNING {SCHEDULE_COLUMNS}
            "#
        );
        Ok(sqlx::query_as(&sql)
            .bind(id)
            .bind(update.job_type.unwrap_or(existing.job_type))
            .bind(update.payload.unwrap_or(existing.payload))
            .bind(&cron_expr)
            .bind(&timezone)
            .bind(update.max_attempts.unwrap_or(existing.max_attempts).max(1))
            .bind(next_run_at)
            .fetch_one(&self.pool)
            .await?)
    }

    /// Enable or disable. The disabled→enabled edge recomputes
    /// `next_run_at`; disabling leaves it in place.
    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<Schedule> {
        let existing = self.get(id).await?;

        let next_run_at = if enabled && !existing.enabled {
            Some(next_run(&existing.cron_expr, &existing.timezone, Utc::now())?)
        } else {
            existing.next_run_at
        };

        let sql = format!(
            r#"
            UPDATE _ayb_schedules
            SET enabled = $2, next_run_at = $3, updated_at = now()
            WHERE id = $1
            RETURNING {SCHEDULE_COLUMNS}
            "#
        );
        Ok(sqlx::query_as(&sql)
            .bind(id)
            .bind(enabled)
            .bind(next_run_at)
            .fetch_one(&self.pool)
            .await?)
    }

    /// Delete a schedule
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM _ayb_schedules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::ScheduleNotFound);
        }
        Ok(())
    }

    /// One scheduler pass: claim due schedules, enqueue, recompute
    pub async fn tick(&self) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            SELECT {SCHEDULE_COLUMNS} FROM _ayb_schedules
            WHERE enabled AND next_run_at IS NOT NULL AND next_run_at <= now()
            FOR UPDATE SKIP LOCKED
            "#
        );
        let due: Vec<Schedule> = sqlx::query_as(&sql).fetch_all(&mut *tx).await?;

        let mut fired = 0;
        for schedule in &due {
            let next = match next_run(&schedule.cron_expr, &schedule.timezone, Utc::now()) {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!(schedule = %schedule.name, error = %e, "schedule became unparseable, disabling");
                    sqlx::query("UPDATE _ayb_schedules SET enabled = false WHERE id = $1")
                        .bind(schedule.id)
                        .execute(&mut *tx)
                        .await?;
                    continue;
                }
            };
            sqlx::query("UPDATE _ayb_schedules SET next_run_at = $2, updated_at = now() WHERE id = $1")
                .bind(schedule.id)
                .bind(next)
                .execute(&mut *tx)
                .await?;
            fired += 1;
        }
        tx.commit().await?;

        // Enqueue outside the claim transaction; a crash between commit
        // and enqueue skips one fire rather than double-firing.
        for schedule in due {
            self.engine
                .enqueue(
                    &schedule.job_type,
                    schedule.payload.clone(),
                    EnqueueOptions {
                        max_attempts: Some(schedule.max_attempts),
                        ..EnqueueOptions::default()
                    },
                )
                .await?;
            tracing::debug!(schedule = %schedule.name, job_type = %schedule.job_type, "schedule fired");
        }
        Ok(fired)
    }

    /// Run the tick loop until shutdown
    pub fn start(&self, tick_interval: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(tick_interval);
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => break,
                    _ = tick.tick() => {}
                }
                if let Err(e) = scheduler.tick().await {
                    tracing::warn!(error = %e, "scheduler tick failed");
                }
            }
        })
    }

    /// Stop the tick loop
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expressions_parse() {
        assert!(parse_cron("*/5 * * * *", "UTC").is_ok());
        assert!(parse_cron("0 3 * * 1", "America/New_York").is_ok());
        assert!(parse_cron("30 14 1 * *", "Europe/Berlin").is_ok());
    }

    #[test]
    fn wrong_field_count_rejected() {
        assert!(parse_cron("* * * *", "UTC").is_err());
        assert!(parse_cron("0 * * * * *", "UTC").is_err());
        assert!(parse_cron("", "UTC").is_err());
    }

    #[test]
    fn bad_cron_or_timezone_rejected() {
        assert!(parse_cron("99 * * * *", "UTC").is_err());
        assert!(parse_cron("* * * * *", "Mars/Olympus").is_err());
    }

    #[test]
    fn next_run_is_strictly_after() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let next = next_run("0 * * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn next_run_respects_timezone() {
        // 03:00 every day in New York (EST = UTC-5 in January)
        let after = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let next = next_run("0 3 * * *", "America/New_York", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap());

        let utc_next = next_run("0 3 * * *", "UTC", after).unwrap();
        assert_eq!(utc_next, Utc.with_ymd_and_hms(2026, 1, 10, 3, 0, 0).unwrap());
    }
}
