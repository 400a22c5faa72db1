//! Admin API-key management

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::{ApiKey, CreateKeyOptions};
use crate::error::Result;
use crate::http::AppJson;
use crate::responses::{ListEnvelope, PageParams};
use crate::state::AppState;
use crate::validate;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyBody {
    user_id: String,
    name: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    allowed_tables: Vec<String>,
}

/// Creation response: the only place the plaintext ever appears
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedKey {
    pub key: String,
    #[serde(flatten)]
    pub record: ApiKey,
}

/// `POST /api/admin/api-keys`
pub async fn create(
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateKeyBody>,
) -> Result<Response> {
    let user_id = validate::uuid_param(&body.user_id)?;
    let app_id = body.app_id.as_deref().map(validate::uuid_param).transpose()?;

    let (plaintext, record) = state
        .api_keys
        .create(
            user_id,
            &body.name,
            CreateKeyOptions {
                scope: body.scope,
                app_id,
                allowed_tables: body.allowed_tables,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedKey {
            key: plaintext,
            record,
        }),
    )
        .into_response())
}

/// `GET /api/admin/api-keys`
pub async fn list(
    State(state): State<AppState>,
    Query(paging): Query<PageParams>,
) -> Result<Json<ListEnvelope<ApiKey>>> {
    let page = paging.page();
    let per_page = paging.per_page();
    let (keys, total) = state.api_keys.list_all(page, per_page).await?;
    Ok(Json(ListEnvelope::new(keys, page, per_page, total)))
}

/// `GET /api/admin/api-keys/{id}`: revoked keys stay retrievable
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<ApiKey>> {
    let id = validate::uuid_param(&id)?;
    Ok(Json(state.api_keys.get(id).await?))
}

/// `POST /api/admin/api-keys/{id}/revoke`
pub async fn revoke(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = validate::uuid_param(&id)?;
    state.api_keys.revoke(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
