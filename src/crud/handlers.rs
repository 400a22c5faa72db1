//! Auto-CRUD handlers under `/api/collections/{table}`

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::Identity;
use crate::crud::query;
use crate::error::{Error, Result};
use crate::http::AppJson;
use crate::realtime::Action;
use crate::responses::{ListEnvelope, PageParams};
use crate::schema::{Snapshot, TableInfo};
use crate::state::AppState;

/// Reserved prefix for internal state tables
const RESERVED_PREFIX: &str = "_ayb_";

fn snapshot(state: &AppState) -> Result<Arc<Snapshot>> {
    state
        .schema
        .get()
        .ok_or_else(|| Error::ServiceUnavailable("schema cache not ready".into()))
}

fn resolve_table<'a>(snapshot: &'a Snapshot, name: &str) -> Result<&'a TableInfo> {
    if name.starts_with(RESERVED_PREFIX) || name.contains(&format!(".{RESERVED_PREFIX}")) {
        return Err(Error::NotFound(format!("table {name:?} not found")));
    }
    snapshot
        .resolve(name)
        .ok_or_else(|| Error::NotFound(format!("table {name:?} not found")))
}

fn primary_key(table: &TableInfo) -> Result<&str> {
    table
        .primary_key
        .first()
        .map(String::as_str)
        .ok_or_else(|| {
            Error::bad_request(format!("table {:?} has no primary key", table.name))
        })
}

fn check_read(identity: &Identity, table: &TableInfo) -> Result<()> {
    if !identity.table_allowed(&table.name) {
        return Err(Error::Forbidden(format!(
            "credential not allowed on table {:?}",
            table.name
        )));
    }
    Ok(())
}

fn check_write(identity: &Identity, table: &TableInfo) -> Result<()> {
    check_read(identity, table)?;
    if !identity.can_write() {
        return Err(Error::Forbidden("credential scope is read-only".into()));
    }
    Ok(())
}

/// Publish the change event and enqueue webhook deliveries.
///
/// Failures on the webhook side are logged, never surfaced to the write.
async fn emit_change(state: &AppState, action: Action, table: &TableInfo, record: serde_json::Value) {
    let event = state.hub.publish(action, &table.name, record);
    if let Err(e) = state.dispatcher.enqueue(&event).await {
        tracing::warn!(table = %table.name, error = %e, "webhook enqueue failed");
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(flatten)]
    pub paging: PageParams,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
}

/// `GET /api/collections/{table}`
pub async fn list(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(table_name): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListEnvelope<serde_json::Value>>> {
    let snapshot = snapshot(&state)?;
    let table = resolve_table(&snapshot, &table_name)?;
    check_read(&identity, table)?;

    let sort = match &params.sort {
        Some(raw) => query::parse_sort(raw, table)?,
        None => Vec::new(),
    };
    let page = params.paging.page();
    let per_page = params.paging.per_page();
    let offset = (page as i64 - 1) * per_page as i64;

    let filter = params.filter.as_deref();
    let rows: Vec<(serde_json::Value,)> = sqlx::query_as(&query::list_sql(table, filter, &sort))
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(&state.pool)
        .await
        .map_err(bad_filter_or_db)?;

    let (total,): (i64,) = sqlx::query_as(&query::count_sql(table, filter))
        .fetch_one(&state.pool)
        .await
        .map_err(bad_filter_or_db)?;

    let items = rows.into_iter().map(|(v,)| v).collect();
    Ok(Json(ListEnvelope::new(items, page, per_page, total)))
}

/// Filter fragments are opaque SQL; the database's parser is the gate,
/// and its complaints are the caller's 400.
fn bad_filter_or_db(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.code().is_some_and(|c| c.starts_with("42")) => {
            Error::BadRequest(format!("invalid filter: {}", db.message()))
        }
        _ => Error::Database(e),
    }
}

/// `GET /api/collections/{table}/{id}`
pub async fn get(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((table_name, id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    let snapshot = snapshot(&state)?;
    let table = resolve_table(&snapshot, &table_name)?;
    check_read(&identity, table)?;
    let pk = primary_key(table)?;

    let row: Option<(serde_json::Value,)> = sqlx::query_as(&query::get_sql(table, pk))
        .bind(&id)
        .fetch_optional(&state.pool)
        .await?;

    row.map(|(v,)| Json(v))
        .ok_or_else(|| Error::NotFound("record not found".into()))
}

/// `POST /api/collections/{table}`
pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(table_name): Path<String>,
    AppJson(body): AppJson<serde_json::Value>,
) -> Result<Response> {
    let snapshot = snapshot(&state)?;
    let table = resolve_table(&snapshot, &table_name)?;
    check_write(&identity, table)?;
    let columns = query::body_columns(&body, table)?;

    let (record,): (serde_json::Value,) = sqlx::query_as(&query::insert_sql(table, &columns))
        .bind(&body)
        .fetch_one(&state.pool)
        .await
        .map_err(bad_filter_or_db)?;

    emit_change(&state, Action::Create, table, record.clone()).await;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

/// `PATCH /api/collections/{table}/{id}`
pub async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((table_name, id)): Path<(String, String)>,
    AppJson(body): AppJson<serde_json::Value>,
) -> Result<Json<serde_json::Value>> {
    let snapshot = snapshot(&state)?;
    let table = resolve_table(&snapshot, &table_name)?;
    check_write(&identity, table)?;
    let pk = primary_key(table)?;
    let columns = query::body_columns(&body, table)?;

    let row: Option<(serde_json::Value,)> =
        sqlx::query_as(&query::update_sql(table, pk, &columns))
            .bind(&body)
            .bind(&id)
            .fetch_optional(&state.pool)
            .await
            .map_err(bad_filter_or_db)?;

    let (record,) = row.ok_or_else(|| Error::NotFound("record not found".into()))?;
    emit_change(&state, Action::Update, table, record.clone()).await;
    Ok(Json(record))
}

/// `DELETE /api/collections/{table}/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((table_name, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let snapshot = snapshot(&state)?;
    let table = resolve_table(&snapshot, &table_name)?;
    check_write(&identity, table)?;
    let pk = primary_key(table)?;

    let row: Option<(serde_json::Value,)> = sqlx::query_as(&query::delete_sql(table, pk))
        .bind(&id)
        .fetch_optional(&state.pool)
        .await?;

    let (record,) = row.ok_or_else(|| Error::NotFound("record not found".into()))?;
    emit_change(&state, Action::Delete, table, record).await;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, TableKind};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snapshot_with(names: &[&str]) -> Snapshot {
        let tables: BTreeMap<String, TableInfo> = names
            .iter()
            .map(|name| {
                let info = TableInfo {
                    schema: "public".into(),
                    name: name.to_string(),
                    kind: TableKind::Table,
                    columns: vec![ColumnInfo {
                        name: "id".into(),
                        data_type: "uuid".into(),
                        nullable: false,
                    }],
                    primary_key: vec!["id".into()],
                };
                (info.qualified_name(), info)
            })
            .collect();
        Snapshot {
            tables,
            built_at: Utc::now(),
        }
    }

    #[test]
    fn reserved_tables_are_hidden() {
        let snapshot = snapshot_with(&["users", "_ayb_jobs"]);
        assert!(resolve_table(&snapshot, "users").is_ok());
        assert!(matches!(
            resolve_table(&snapshot, "_ayb_jobs"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            resolve_table(&snapshot, "public._ayb_jobs"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn unknown_table_is_not_found() {
        let snapshot = snapshot_with(&["users"]);
        assert!(matches!(
            resolve_table(&snapshot, "orders"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn syntax_errors_map_to_bad_request() {
        // 42601 is Postgres syntax_error; anything in class 42 blames the filter
        let err = bad_filter_or_db(sqlx::Error::PoolClosed);
        assert!(matches!(err, Error::Database(_)));
    }
}
