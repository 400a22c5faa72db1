//! Admin app management

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::apps::App;
use crate::error::Result;
use crate::http::AppJson;
use crate::responses::{ListEnvelope, PageParams};
use crate::state::AppState;
use crate::validate;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppBody {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    owner_user_id: Option<String>,
    #[serde(default = "default_rps")]
    rate_limit_rps: i32,
    #[serde(default = "default_window")]
    rate_limit_window_secs: i32,
}

fn default_rps() -> i32 {
    10
}

fn default_window() -> i32 {
    60
}

/// `POST /api/admin/apps`
pub async fn create(
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateAppBody>,
) -> Result<Response> {
    let owner = body
        .owner_user_id
        .as_deref()
        .map(validate::uuid_param)
        .transpose()?;
    let app = state
        .apps
        .create(
            &body.name,
            body.description.as_deref(),
            owner,
            body.rate_limit_rps,
            body.rate_limit_window_secs,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(app)).into_response())
}

/// `GET /api/admin/apps`
pub async fn list(
    State(state): State<AppState>,
    Query(paging): Query<PageParams>,
) -> Result<Json<ListEnvelope<App>>> {
    let page = paging.page();
    let per_page = paging.per_page();
    let (apps, total) = state.apps.list(page, per_page).await?;
    Ok(Json(ListEnvelope::new(apps, page, per_page, total)))
}

/// `GET /api/admin/apps/{id}`
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<App>> {
    let id = validate::uuid_param(&id)?;
    Ok(Json(state.apps.get(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    rate_limit_rps: Option<i32>,
    #[serde(default)]
    rate_limit_window_secs: Option<i32>,
}

/// `PATCH /api/admin/apps/{id}`
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateAppBody>,
) -> Result<Json<App>> {
    let id = validate::uuid_param(&id)?;
    let app = state
        .apps
        .update(
            id,
            body.name,
            body.description,
            body.rate_limit_rps,
            body.rate_limit_window_secs,
        )
        .await?;
    Ok(Json(app))
}

/// `DELETE /api/admin/apps/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = validate::uuid_param(&id)?;
    state.apps.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
