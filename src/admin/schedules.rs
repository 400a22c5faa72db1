//! Admin schedule management

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::error::Result;
use crate::http::AppJson;
use crate::jobs::{Schedule, ScheduleUpdate};
use crate::state::AppState;
use crate::validate;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleBody {
    name: String,
    job_type: String,
    #[serde(default)]
    payload: serde_json::Value,
    cron_expr: String,
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default = "default_max_attempts")]
    max_attempts: i32,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_max_attempts() -> i32 {
    3
}

/// `POST /api/admin/schedules`
pub async fn create(
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateScheduleBody>,
) -> Result<Response> {
    let scheduler = state.scheduler()?;
    let schedule = scheduler
        .create(
            &body.name,
            &body.job_type,
            body.payload,
            &body.cron_expr,
            &body.timezone,
            body.max_attempts,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)).into_response())
}

#[derive(Debug, serde::Serialize)]
pub struct ScheduleList {
    items: Vec<Schedule>,
}

/// `GET /api/admin/schedules`
pub async fn list(State(state): State<AppState>) -> Result<Json<ScheduleList>> {
    let scheduler = state.scheduler()?;
    Ok(Json(ScheduleList {
        items: scheduler.list().await?,
    }))
}

/// `GET /api/admin/schedules/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Schedule>> {
    let scheduler = state.scheduler()?;
    let id = validate::uuid_param(&id)?;
    Ok(Json(scheduler.get(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScheduleBody {
    #[serde(default)]
    job_type: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    cron_expr: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    max_attempts: Option<i32>,
}

/// `PATCH /api/admin/schedules/{id}`
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateScheduleBody>,
) -> Result<Json<Schedule>> {
    let scheduler = state.scheduler()?;
    let id = validate::uuid_param(&id)?;
    let schedule = scheduler
        .update(
            id,
            ScheduleUpdate {
                job_type: body.job_type,
                payload: body.payload,
                cron_expr: body.cron_expr,
                timezone: body.timezone,
                max_attempts: body.max_attempts,
            },
        )
        .await?;
    Ok(Json(schedule))
}

/// `POST /api/admin/schedules/{id}/enable`
pub async fn enable(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Schedule>> {
    let scheduler = state.scheduler()?;
    let id = validate::uuid_param(&id)?;
    Ok(Json(scheduler.set_enabled(id, true).await?))
}

/// `POST /api/admin/schedules/{id}/disable`
pub async fn disable(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Schedule>> {
    let scheduler = state.scheduler()?;
    let id = validate::uuid_param(&id)?;
    Ok(Json(scheduler.set_enabled(id, false).await?))
}

/// `DELETE /api/admin/schedules/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let scheduler = state.scheduler()?;
    let id = validate::uuid_param(&id)?;
    scheduler.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
