//! Admin system endpoints: logs, runtime stats, secret rotation

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::Result;
use crate::state::AppState;
use crate::telemetry::LogEntry;

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    entries: Vec<LogEntry>,
}

/// `GET /api/admin/logs`
pub async fn logs(State(state): State<AppState>) -> Json<LogsResponse> {
    Json(LogsResponse {
        entries: state.logs.entries(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub uptime_secs: i64,
    pub memory_bytes: u64,
    pub cpu_percent: f32,
    pub pool_size: u32,
    pub pool_idle: usize,
    pub realtime_subscribers: usize,
    pub schema_tables: usize,
}

/// `GET /api/admin/stats`
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let (memory_bytes, cpu_percent) = system
        .process(pid)
        .map(|p| (p.memory(), p.cpu_usage()))
        .unwrap_or((0, 0.0));

    Ok(Json(StatsResponse {
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        memory_bytes,
        cpu_percent,
        pool_size: state.pool.size(),
        pool_idle: state.pool.num_idle(),
        realtime_subscribers: state.hub.subscriber_count(),
        schema_tables: state.schema.get().map(|s| s.tables.len()).unwrap_or(0),
    }))
}

#[derive(Debug, Serialize)]
pub struct RotatedSecret {
    secret: String,
}

/// `POST /api/admin/secrets/rotate`
///
/// Swaps the JWT signing secret; every outstanding JWT stops validating
/// on the spot.
pub async fn rotate_secret(State(state): State<AppState>) -> Json<RotatedSecret> {
    let secret = state.keystore.rotate_jwt_secret();
    tracing::warn!("jwt signing secret rotated; all outstanding tokens invalidated");
    Json(RotatedSecret { secret })
}
