//! Materialized view registrations and refresh
//!
//! `concurrent` refresh needs a unique index and a populated view; the
//! database's complaints for either are surfaced as specific 400s.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::http::AppJson;
use crate::state::AppState;
use crate::validate;

/// Refresh strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum RefreshMode {
    Standard,
    Concurrent,
}

impl RefreshMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "standard" => Ok(RefreshMode::Standard),
            "concurrent" => Ok(RefreshMode::Concurrent),
            other => Err(Error::bad_request(format!(
                "refresh mode must be standard or concurrent, got {other:?}"
            ))),
        }
    }
}

/// A registered materialized view
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MatviewRegistration {
    pub id: Uuid,
    pub schema: String,
    pub view_name: String,
    pub refresh_mode: RefreshMode,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMatviewBody {
    #[serde(default = "default_schema")]
    schema: String,
    view_name: String,
    #[serde(default = "default_mode")]
    refresh_mode: String,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_mode() -> String {
    "standard".to_string()
}

/// `POST /api/admin/matviews`
pub async fn register(
    State(state): State<AppState>,
    AppJson(body): AppJson<RegisterMatviewBody>,
) -> Result<Response> {
    validate::identifier(&body.schema)?;
    validate::identifier(&body.view_name)?;
    let mode = RefreshMode::parse(&body.refresh_mode)?;

    let registration: MatviewRegistration = sqlx::query_as(
        r#"
        INSERT INTO _ayb_matviews (id, schema, view_name, refresh_mode)
        VALUES ($1, $2, $3, $4)
        RETURNING id, schema, view_name, refresh_mode, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&body.schema)
    .bind(&body.view_name)
    .bind(mode)
    .fetch_one(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(registration)).into_response())
}

#[derive(Debug, Serialize)]
pub struct MatviewList {
    items: Vec<MatviewRegistration>,
}

/// `GET /api/admin/matviews`
pub async fn list(State(state): State<AppState>) -> Result<Json<MatviewList>> {
    let items: Vec<MatviewRegistration> = sqlx::query_as(
        "SELECT id, schema, view_name, refresh_mode, created_at FROM _ayb_matviews ORDER BY schema, view_name",
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(MatviewList { items }))
}

async fn fetch(state: &AppState, id: Uuid) -> Result<MatviewRegistration> {
    sqlx::query_as(
        "SELECT id, schema, view_name, refresh_mode, created_at FROM _ayb_matviews WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| Error::NotFound("matview registration not found".into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMatviewBody {
    refresh_mode: String,
}

/// `PATCH /api/admin/matviews/{id}`
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateMatviewBody>,
) -> Result<Json<MatviewRegistration>> {
    let id = validate::uuid_param(&id)?;
    let mode = RefreshMode::parse(&body.refresh_mode)?;
    fetch(&state, id).await?;

    let registration: MatviewRegistration = sqlx::query_as(
        r#"
        UPDATE _ayb_matviews SET refresh_mode = $2 WHERE id = $1
        RETURNING id, schema, view_name, refresh_mode, created_at
        "#,
    )
    .bind(id)
    .bind(mode)
    .fetch_one(&state.pool)
    .await?;
    Ok(Json(registration))
}

/// `DELETE /api/admin/matviews/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = validate::uuid_param(&id)?;
    let result = sqlx::query("DELETE FROM _ayb_matviews WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound("matview registration not found".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/admin/matviews/{id}/refresh`
pub async fn refresh(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = validate::uuid_param(&id)?;
    let registration = fetch(&state, id).await?;

    let concurrently = match registration.refresh_mode {
        RefreshMode::Concurrent => "CONCURRENTLY ",
        RefreshMode::Standard => "",
    };
    let sql = format!(
        "REFRESH MATERIALIZED VIEW {concurrently}{}.{}",
        validate::quote_identifier(&registration.schema),
        validate::quote_identifier(&registration.view_name),
    );

    sqlx::raw_sql(&sql).execute(&state.pool).await.map_err(|e| {
        match &e {
            sqlx::Error::Database(db) => {
                let message = db.message();
                // the two concurrent-refresh preconditions get precise errors
                if message.contains("unique index") {
                    Error::BadRequest(format!(
                        "concurrent refresh requires a unique index on {}.{}",
                        registration.schema, registration.view_name
                    ))
                } else if message.contains("has not been populated") {
                    Error::BadRequest(format!(
                        "materialized view {}.{} has not been populated",
                        registration.schema, registration.view_name
                    ))
                } else {
                    Error::BadRequest(message.to_string())
                }
            }
            _ => Error::Database(e),
        }
    })?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!(RefreshMode::parse("standard").unwrap(), RefreshMode::Standard);
        assert_eq!(
            RefreshMode::parse("concurrent").unwrap(),
            RefreshMode::Concurrent
        );
        assert!(RefreshMode::parse("eager").is_err());
    }
}
