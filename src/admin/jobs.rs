//! Admin job management

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::jobs::{Job, JobState, JobStats};
use crate::responses::{ListEnvelope, PageParams};
use crate::state::AppState;
use crate::validate;

fn parse_state(raw: &str) -> Result<JobState> {
    match raw {
        "queued" => Ok(JobState::Queued),
        "running" => Ok(JobState::Running),
        "completed" => Ok(JobState::Completed),
        "failed" => Ok(JobState::Failed),
        "canceled" => Ok(JobState::Canceled),
        other => Err(Error::bad_request(format!("unknown job state {other:?}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct JobListParams {
    #[serde(flatten)]
    paging: PageParams,
    #[serde(default)]
    state: Option<String>,
}

/// `GET /api/admin/jobs`
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<JobListParams>,
) -> Result<Json<ListEnvelope<Job>>> {
    let engine = state.jobs()?;
    let filter = params.state.as_deref().map(parse_state).transpose()?;
    let page = params.paging.page();
    let per_page = params.paging.per_page();
    let (jobs, total) = engine.list(filter, page, per_page).await?;
    Ok(Json(ListEnvelope::new(jobs, page, per_page, total)))
}

/// `GET /api/admin/jobs/{id}`
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>> {
    let engine = state.jobs()?;
    let id = validate::uuid_param(&id)?;
    Ok(Json(engine.get(id).await?))
}

/// `POST /api/admin/jobs/{id}/cancel`: only from `queued`
pub async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>> {
    let engine = state.jobs()?;
    let id = validate::uuid_param(&id)?;
    Ok(Json(engine.cancel(id).await?))
}

/// `POST /api/admin/jobs/{id}/retry`: only from `failed`
pub async fn retry(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>> {
    let engine = state.jobs()?;
    let id = validate::uuid_param(&id)?;
    Ok(Json(engine.retry_now(id).await?))
}

/// `GET /api/admin/jobs/stats`
pub async fn stats(State(state): State<AppState>) -> Result<Json<JobStats>> {
    let engine = state.jobs()?;
    Ok(Json(engine.stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_filter_parsing() {
        assert_eq!(parse_state("queued").unwrap(), JobState::Queued);
        assert_eq!(parse_state("canceled").unwrap(), JobState::Canceled);
        assert!(parse_state("exploded").is_err());
        assert!(parse_state("QUEUED").is_err());
    }
}
