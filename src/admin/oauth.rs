//! Admin OAuth client management

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::{ClientType, OAuthClient, RegisterClient};
use crate::error::Result;
use crate::http::AppJson;
use crate::responses::{ListEnvelope, PageParams};
use crate::state::AppState;
use crate::validate;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    app_id: String,
    name: String,
    #[serde(rename = "type")]
    client_type: String,
    redirect_uris: Vec<String>,
    #[serde(default)]
    scopes: Vec<String>,
}

/// Registration response; `clientSecret` appears once and only for
/// confidential clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredClient {
    #[serde(flatten)]
    pub record: OAuthClient,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// `POST /api/admin/oauth/clients`
pub async fn register(
    State(state): State<AppState>,
    AppJson(body): AppJson<RegisterBody>,
) -> Result<Response> {
    let app_id = validate::uuid_param(&body.app_id)?;
    let client_type = ClientType::parse(&body.client_type)?;

    let (record, client_secret) = state
        .oauth_clients
        .register(RegisterClient {
            app_id,
            name: body.name,
            client_type,
            redirect_uris: body.redirect_uris,
            scopes: body.scopes,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisteredClient {
            record,
            client_secret,
        }),
    )
        .into_response())
}

/// `GET /api/admin/oauth/clients`
pub async fn list(
    State(state): State<AppState>,
    Query(paging): Query<PageParams>,
) -> Result<Json<ListEnvelope<OAuthClient>>> {
    let page = paging.page();
    let per_page = paging.per_page();
    let (clients, total) = state.oauth_clients.list(page, per_page).await?;
    Ok(Json(ListEnvelope::new(clients, page, per_page, total)))
}

/// `GET /api/admin/oauth/clients/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OAuthClient>> {
    let id = validate::uuid_param(&id)?;
    Ok(Json(state.oauth_clients.get(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClientBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
}

/// `PATCH /api/admin/oauth/clients/{id}`
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateClientBody>,
) -> Result<Json<OAuthClient>> {
    let id = validate::uuid_param(&id)?;
    let client = state
        .oauth_clients
        .update(id, body.name, body.redirect_uris, body.scopes)
        .await?;
    Ok(Json(client))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatedSecret {
    pub client_secret: String,
}

/// `POST /api/admin/oauth/clients/{id}/rotate-secret`
pub async fn rotate_secret(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RotatedSecret>> {
    let id = validate::uuid_param(&id)?;
    let client_secret = state.oauth_clients.rotate_secret(id).await?;
    Ok(Json(RotatedSecret { client_secret }))
}

/// `DELETE /api/admin/oauth/clients/{id}`: revoke
pub async fn revoke(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = validate::uuid_param(&id)?;
    state.oauth_clients.revoke(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
