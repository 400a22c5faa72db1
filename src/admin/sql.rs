//! Admin SQL executor
//!
//! Runs arbitrary SQL over the simple query protocol (so multi-statement
//! scripts work), bounded by a 30-second timeout. Result values are
//! JSON-coerced, and a DDL statement triggers a synchronous schema-cache
//! reload before the response goes out. Every call is recorded to the
//! log ring as the admin audit trail.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::http::AppJson;
use crate::schema;
use crate::state::AppState;

/// Query execution bound
const SQL_TIMEOUT: Duration = Duration::from_secs(30);

/// Audit-log truncation for the query text
const AUDIT_QUERY_MAX: usize = 512;

#[derive(Debug, Deserialize)]
pub struct SqlBody {
    query: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: u64,
    pub duration_ms: u64,
}

/// Coerce one cell to JSON following the executor's rules:
/// timestamps → RFC3339 with nanoseconds, UUIDs → canonical hex, bytea →
/// JSON if it parses (16-byte values read as UUIDs), everything else
/// passes through.
fn coerce_value(row: &PgRow, index: usize) -> serde_json::Value {
    use serde_json::Value;

    let raw = match row.try_get_raw(index) {
        Ok(raw) => raw,
        Err(_) => return Value::Null,
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_string();

    match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(index).map(Value::Bool).unwrap_or(Value::Null),
        "INT2" => row
            .try_get::<i16, _>(index)
            .map(|v| Value::from(v as i64))
            .unwrap_or(Value::Null),
        "INT4" => row
            .try_get::<i32, _>(index)
            .map(|v| Value::from(v as i64))
            .unwrap_or(Value::Null),
        "INT8" => row
            .try_get::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT4" => row
            .try_get::<f32, _>(index)
            .map(|v| Value::from(v as f64))
            .unwrap_or(Value::Null),
        "FLOAT8" => row
            .try_get::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "UUID" => row
            .try_get::<Uuid, _>(index)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|v| Value::String(v.to_rfc3339_opts(SecondsFormat::Nanos, true)))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|v| Value::String(v.and_utc().to_rfc3339_opts(SecondsFormat::Nanos, true)))
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<NaiveDate, _>(index)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<serde_json::Value, _>(index)
            .unwrap_or(Value::Null),
        "BYTEA" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| coerce_bytes(&bytes))
            .unwrap_or(Value::Null),
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => row
            .try_get::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
        _ => raw
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .unwrap_or(Value::Null),
    }
}

/// bytea coercion: 16 bytes read as a UUID, valid JSON stays JSON, valid
/// UTF-8 becomes a string, anything else is hex
fn coerce_bytes(bytes: &[u8]) -> serde_json::Value {
    use serde_json::Value;

    if bytes.len() == 16 {
        if let Ok(uuid) = Uuid::from_slice(bytes) {
            return Value::String(uuid.to_string());
        }
    }
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return value;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::String(hex::encode(bytes)),
    }
}

/// `POST /api/admin/sql`
pub async fn execute(
    State(state): State<AppState>,
    AppJson(body): AppJson<SqlBody>,
) -> Result<Json<SqlResponse>> {
    let query = body.query.trim().to_string();
    if query.is_empty() {
        return Err(Error::bad_request("query is required"));
    }

    let audit: String = query.chars().take(AUDIT_QUERY_MAX).collect();
    tracing::info!(target: "aybase::admin::sql", query = %audit, "admin sql executed");

    let started = Instant::now();
    let run = async {
        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<serde_json::Value>> = Vec::new();
        let mut affected: u64 = 0;

        let mut stream = sqlx::raw_sql(&query).fetch_many(&state.pool);
        while let Some(step) = stream.try_next().await? {
            match step {
                sqlx::Either::Left(done) => {
                    affected += done.rows_affected();
                }
                sqlx::Either::Right(row) => {
                    if columns.is_empty() {
                        columns = row
                            .columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect();
                    }
                    let values = (0..row.columns().len())
                        .map(|i| coerce_value(&row, i))
                        .collect();
                    rows.push(values);
                }
            }
        }
        Ok::<_, sqlx::Error>((columns, rows, affected))
    };

    let result = tokio::time::timeout(SQL_TIMEOUT, run)
        .await
        .map_err(|_| Error::bad_request("query exceeded the 30 second limit"))?;

    let (columns, rows, affected) = result.map_err(|e| match &e {
        sqlx::Error::Database(db) => Error::BadRequest(db.message().to_string()),
        _ => Error::Database(e),
    })?;

    // The DDL already committed; a reload failure must not fail it.
    if schema::is_ddl(&query) {
        if let Err(e) = state.schema.reload_wait().await {
            tracing::error!(error = %e, "schema reload after DDL failed");
        }
    }

    let row_count = if rows.is_empty() {
        affected
    } else {
        rows.len() as u64
    };

    Ok(Json(SqlResponse {
        columns,
        rows,
        row_count,
        duration_ms: started.elapsed().as_millis() as u64,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytea_coercion_rules() {
        // 16 bytes → uuid
        let uuid = Uuid::new_v4();
        assert_eq!(
            coerce_bytes(uuid.as_bytes()),
            serde_json::Value::String(uuid.to_string())
        );
        // valid json → parsed
        assert_eq!(
            coerce_bytes(br#"{"a":1}"#),
            serde_json::json!({"a": 1})
        );
        // valid utf-8 → string
        assert_eq!(
            coerce_bytes(b"plain text"),
            serde_json::Value::String("plain text".into())
        );
        // binary garbage → hex
        assert_eq!(
            coerce_bytes(&[0xff, 0xfe, 0x00]),
            serde_json::Value::String("fffe00".into())
        );
    }

    #[test]
    fn response_rows_serialize_as_array() {
        let response = SqlResponse {
            columns: vec!["?column?".into()],
            rows: vec![],
            row_count: 0,
            duration_ms: 3,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["rows"].is_array());
        assert_eq!(json["rowCount"], 0);
        assert!(json.get("durationMs").is_some());
    }
}
