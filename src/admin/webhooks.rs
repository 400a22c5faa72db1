//! Admin webhook management and the delivery log view

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::http::AppJson;
use crate::state::AppState;
use crate::validate;
use crate::webhooks::{Delivery, Webhook};

#[derive(Debug, Deserialize)]
pub struct CreateWebhookBody {
    url: String,
    secret: String,
    #[serde(default)]
    tables: Vec<String>,
    #[serde(default)]
    events: Vec<String>,
}

/// `POST /api/admin/webhooks`
pub async fn create(
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateWebhookBody>,
) -> Result<Response> {
    let webhook = state
        .webhooks
        .create(&body.url, &body.secret, body.tables, body.events)
        .await?;
    Ok((StatusCode::CREATED, Json(webhook)).into_response())
}

#[derive(Debug, Serialize)]
pub struct WebhookList {
    items: Vec<Webhook>,
}

/// `GET /api/admin/webhooks`
pub async fn list(State(state): State<AppState>) -> Result<Json<WebhookList>> {
    Ok(Json(WebhookList {
        items: state.webhooks.list().await?,
    }))
}

/// `DELETE /api/admin/webhooks/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = validate::uuid_param(&id)?;
    state.webhooks.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DeliveryParams {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct DeliveryList {
    items: Vec<Delivery>,
}

/// `GET /api/admin/webhooks/deliveries`
pub async fn deliveries(
    State(state): State<AppState>,
    Query(params): Query<DeliveryParams>,
) -> Result<Json<DeliveryList>> {
    let limit = params.limit.clamp(1, 1000);
    Ok(Json(DeliveryList {
        items: state.webhooks.list_deliveries(limit).await?,
    }))
}
