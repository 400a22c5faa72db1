//! Admin email-template management and send

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::email::templates::{render, RenderedEmail};
use crate::email::EmailTemplate;
use crate::error::{Error, Result};
use crate::http::AppJson;
use crate::state::AppState;
use crate::validate;

#[derive(Debug, Serialize)]
pub struct TemplateList {
    items: Vec<EmailTemplate>,
}

/// `GET /api/admin/email/templates`
pub async fn list(State(state): State<AppState>) -> Result<Json<TemplateList>> {
    Ok(Json(TemplateList {
        items: state.templates.list().await?,
    }))
}

/// `GET /api/admin/email/templates/{key}`: the effective template
pub async fn get(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<EmailTemplate>> {
    validate::template_key(&key)?;
    Ok(Json(state.templates.get_effective(&key).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpsertBody {
    subject: String,
    html: String,
}

/// `PUT /api/admin/email/templates/{key}`
pub async fn upsert(
    State(state): State<AppState>,
    Path(key): Path<String>,
    AppJson(body): AppJson<UpsertBody>,
) -> Result<Json<EmailTemplate>> {
    Ok(Json(
        state.templates.upsert(&key, &body.subject, &body.html).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct PatchBody {
    enabled: bool,
}

/// `PATCH /api/admin/email/templates/{key}`: enable/disable the override
pub async fn patch(
    State(state): State<AppState>,
    Path(key): Path<String>,
    AppJson(body): AppJson<PatchBody>,
) -> Result<StatusCode> {
    validate::template_key(&key)?;
    state.templates.set_enabled(&key, body.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/admin/email/templates/{key}`: drop the override
pub async fn delete(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode> {
    validate::template_key(&key)?;
    state.templates.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PreviewBody {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    vars: serde_json::Value,
}

/// `POST /api/admin/email/templates/preview`
///
/// Renders either the inline subject/html pair or, when only a key is
/// given, that key's effective template.
pub async fn preview(
    State(state): State<AppState>,
    AppJson(body): AppJson<PreviewBody>,
) -> Result<Json<RenderedEmail>> {
    let rendered = match (&body.subject, &body.html) {
        (Some(subject), Some(html)) => render(subject, html, &body.vars)?,
        _ => {
            let key = body
                .key
                .as_deref()
                .ok_or_else(|| Error::bad_request("either key or subject+html is required"))?;
            validate::template_key(key)?;
            state.templates.render_key(key, &body.vars).await?
        }
    };
    Ok(Json(rendered))
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    key: String,
    to: String,
    #[serde(default)]
    vars: serde_json::Value,
}

/// `POST /api/admin/email/send`
pub async fn send(
    State(state): State<AppState>,
    AppJson(body): AppJson<SendBody>,
) -> Result<StatusCode> {
    validate::template_key(&body.key)?;
    let mailer = state
        .mailer
        .as_ref()
        .ok_or_else(|| Error::ServiceUnavailable("smtp transport not configured".into()))?;

    let rendered = state.templates.render_key(&body.key, &body.vars).await?;
    mailer.send(&body.to, &rendered).await?;
    Ok(StatusCode::NO_CONTENT)
}
