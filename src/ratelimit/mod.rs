//! In-memory rate limiters
//!
//! Three independent layers: fixed-window per-IP buckets for the admin
//! login and auth endpoints, and a sliding-window per-app limiter fed by
//! each app's `(requests_per_second, window_seconds)` budget. Buckets
//! live in sharded maps and reset on restart by design; each limiter
//! owns a sweeper task released by `stop()`.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Sweep cadence for stale buckets
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct FixedBucket {
    window_start: Instant,
    count: u32,
}

/// Fixed-window limiter: `limit` requests per `window` per key
pub struct FixedWindowLimiter {
    buckets: Arc<DashMap<String, FixedBucket>>,
    limit: u32,
    window: Duration,
    shutdown: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl FixedWindowLimiter {
    /// Create the limiter and spawn its sweeper
    pub fn new(limit: u32, window: Duration) -> Self {
        let buckets: Arc<DashMap<String, FixedBucket>> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        let sweeper = {
            let buckets = buckets.clone();
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                let mut tick = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tick.tick() => {}
                    }
                    let cutoff = Instant::now() - window * 2;
                    buckets.retain(|_, bucket| bucket.window_start > cutoff);
                }
            }))
        };

        Self {
            buckets,
            limit,
            window,
            shutdown,
            sweeper,
        }
    }

    /// Count one request; errors with `Retry-After` when over budget
    pub fn check(&self, key: &str) -> Result<()> {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| FixedBucket {
                window_start: now,
                count: 0,
            });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        if bucket.count >= self.limit {
            let elapsed = now.duration_since(bucket.window_start);
            let retry_after = self.window.saturating_sub(elapsed).as_secs().max(1);
            return Err(Error::RateLimited { retry_after });
        }
        bucket.count += 1;
        Ok(())
    }

    /// Release the sweeper
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for FixedWindowLimiter {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

#[derive(Debug)]
struct SlidingBucket {
    window_start: Instant,
    current: u32,
    previous: u32,
    window: Duration,
    budget: u32,
}

/// Sliding-window limiter keyed by app id; per-key budgets come from the
/// app record at check time.
pub struct SlidingWindowLimiter {
    buckets: Arc<DashMap<String, SlidingBucket>>,
    shutdown: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl SlidingWindowLimiter {
    /// Create the limiter and spawn its sweeper
    pub fn new() -> Self {
        let buckets: Arc<DashMap<String, SlidingBucket>> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        let sweeper = {
            let buckets = buckets.clone();
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                let mut tick = tokio::time::interval(SWEEP_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tick.tick() => {}
                    }
                    let now = Instant::now();
                    buckets.retain(|_, b| now.duration_since(b.window_start) < b.window * 3);
                }
            }))
        };

        Self {
            buckets,
            shutdown,
            sweeper,
        }
    }

    /// Count one request against `requests_per_second * window_seconds`.
    ///
    /// The weighted count interpolates the previous window, so a burst at
    /// a window edge cannot double the budget.
    pub fn check(&self, key: &str, requests_per_second: u32, window_seconds: u64) -> Result<()> {
        let window = Duration::from_secs(window_seconds.max(1));
        let budget = requests_per_second.saturating_mul(window_seconds.max(1) as u32).max(1);
        let now = Instant::now();

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| SlidingBucket {
                window_start: now,
                current: 0,
                previous: 0,
                window,
                budget,
            });

        // budgets follow the app record
        bucket.window = window;
        bucket.budget = budget;

        let elapsed = now.duration_since(bucket.window_start);
        if elapsed >= window {
            let windows_passed = (elapsed.as_secs_f64() / window.as_secs_f64()) as u32;
            bucket.previous = if windows_passed > 1 { 0 } else { bucket.current };
            bucket.current = 0;
            bucket.window_start = now
                - Duration::from_secs_f64(
                    elapsed.as_secs_f64() % window.as_secs_f64(),
                );
        }

        let fraction =
            now.duration_since(bucket.window_start).as_secs_f64() / window.as_secs_f64();
        let weighted =
            bucket.current as f64 + bucket.previous as f64 * (1.0 - fraction).max(0.0);

        if weighted >= bucket.budget as f64 {
            let retry_after = window
                .saturating_sub(now.duration_since(bucket.window_start))
                .as_secs()
                .max(1);
            return Err(Error::RateLimited { retry_after });
        }
        bucket.current += 1;
        Ok(())
    }

    /// Release the sweeper
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for SlidingWindowLimiter {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_window_enforces_limit() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1").is_ok());
        }
        match limiter.check("10.0.0.1") {
            Err(Error::RateLimited { retry_after }) => assert!(retry_after >= 1),
            other => panic!("expected rate limit, got {other:?}"),
        }
        // separate keys have separate budgets
        assert!(limiter.check("10.0.0.2").is_ok());
        limiter.stop();
    }

    #[tokio::test]
    async fn fixed_window_resets_after_window() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_millis(30));
        assert!(limiter.check("ip").is_ok());
        assert!(limiter.check("ip").is_err());
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check("ip").is_ok());
        limiter.stop();
    }

    #[tokio::test]
    async fn sliding_window_enforces_budget() {
        let limiter = SlidingWindowLimiter::new();
        // 2 rps over a 1-second window = budget of 2
        assert!(limiter.check("app-1", 2, 1).is_ok());
        assert!(limiter.check("app-1", 2, 1).is_ok());
        assert!(limiter.check("app-1", 2, 1).is_err());
        // other apps unaffected
        assert!(limiter.check("app-2", 2, 1).is_ok());
        limiter.stop();
    }

    #[tokio::test]
    async fn sliding_window_honours_changed_budget() {
        let limiter = SlidingWindowLimiter::new();
        assert!(limiter.check("app", 1, 1).is_ok());
        assert!(limiter.check("app", 1, 1).is_err());
        // the app record was raised; the limiter follows it
        assert!(limiter.check("app", 10, 1).is_ok());
        limiter.stop();
    }
}
