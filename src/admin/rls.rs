//! Row-level-security DDL facade
//!
//! Identifiers are validated then double-quoted; policy expressions are
//! opaque text whose final gate is the database parser. `PUBLIC` is the
//! one role accepted without quoting.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http::AppJson;
use crate::state::AppState;
use crate::validate;

/// Documentation pointer returned with command rejections
const COMMANDS_DOC_URL: &str = "https://docs.aybase.dev/rls#commands";

const ALLOWED_COMMANDS: &[&str] = &["ALL", "SELECT", "INSERT", "UPDATE", "DELETE"];

fn check_command(command: &str) -> Result<String> {
    let upper = command.to_uppercase();
    if ALLOWED_COMMANDS.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(Error::BadRequestDoc {
            message: format!(
                "command must be one of ALL, SELECT, INSERT, UPDATE, DELETE; got {command:?}"
            ),
            doc_url: COMMANDS_DOC_URL.to_string(),
        })
    }
}

fn quote_role(role: &str) -> Result<String> {
    if role == "PUBLIC" {
        return Ok(role.to_string());
    }
    validate::identifier(role)?;
    Ok(validate::quote_identifier(role))
}

/// Surface database complaints about opaque expressions as 400s
fn db_error_to_bad_request(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db) => Error::BadRequest(db.message().to_string()),
        _ => Error::Database(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyBody {
    table: String,
    policy_name: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default = "default_command")]
    command: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    using: Option<String>,
    #[serde(default)]
    with_check: Option<String>,
}

fn default_command() -> String {
    "ALL".to_string()
}

/// Build the CREATE POLICY statement from validated parts
fn create_policy_sql(body: &CreatePolicyBody) -> Result<String> {
    validate::identifier(&body.table)?;
    validate::identifier(&body.policy_name)?;
    let schema = body.schema.as_deref().unwrap_or("public");
    validate::identifier(schema)?;
    let command = check_command(&body.command)?;

    let mut sql = format!(
        "CREATE POLICY {} ON {}.{} FOR {}",
        validate::quote_identifier(&body.policy_name),
        validate::quote_identifier(schema),
        validate::quote_identifier(&body.table),
        command,
    );

    if !body.roles.is_empty() {
        let roles: Result<Vec<String>> = body.roles.iter().map(|r| quote_role(r)).collect();
        sql.push_str(&format!(" TO {}", roles?.join(", ")));
    }
    if let Some(using) = body.using.as_deref().filter(|s| !s.trim().is_empty()) {
        sql.push_str(&format!(" USING ({using})"));
    }
    if let Some(check) = body.with_check.as_deref().filter(|s| !s.trim().is_empty()) {
        sql.push_str(&format!(" WITH CHECK ({check})"));
    }
    Ok(sql)
}

/// `POST /api/admin/rls/policies`
pub async fn create_policy(
    State(state): State<AppState>,
    AppJson(body): AppJson<CreatePolicyBody>,
) -> Result<StatusCode> {
    let sql = create_policy_sql(&body)?;
    sqlx::raw_sql(&sql)
        .execute(&state.pool)
        .await
        .map_err(db_error_to_bad_request)?;
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropPolicyBody {
    table: String,
    #[serde(default)]
    schema: Option<String>,
}

/// `DELETE /api/admin/rls/policies/{name}`
pub async fn drop_policy(
    State(state): State<AppState>,
    Path(policy_name): Path<String>,
    AppJson(body): AppJson<DropPolicyBody>,
) -> Result<StatusCode> {
    validate::identifier(&policy_name)?;
    validate::identifier(&body.table)?;
    let schema = body.schema.as_deref().unwrap_or("public");
    validate::identifier(schema)?;

    let sql = format!(
        "DROP POLICY {} ON {}.{}",
        validate::quote_identifier(&policy_name),
        validate::quote_identifier(schema),
        validate::quote_identifier(&body.table),
    );
    sqlx::raw_sql(&sql)
        .execute(&state.pool)
        .await
        .map_err(db_error_to_bad_request)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRow {
    pub schema_name: String,
    pub table_name: String,
    pub policy_name: String,
    pub command: Option<String>,
    pub roles: Vec<String>,
    pub using_expr: Option<String>,
    pub with_check: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PolicyList {
    pub items: Vec<PolicyRow>,
}

/// `GET /api/admin/rls/policies`
pub async fn list_policies(State(state): State<AppState>) -> Result<Json<PolicyList>> {
    let items: Vec<PolicyRow> = sqlx::query_as(
        r#"
        SELECT n.nspname            AS schema_name,
               c.relname            AS table_name,
               p.polname            AS policy_name,
               CASE p.polcmd
                   WHEN 'r' THEN 'SELECT'
                   WHEN 'a' THEN 'INSERT'
                   WHEN 'w' THEN 'UPDATE'
                   WHEN 'd' THEN 'DELETE'
                   ELSE 'ALL'
               END                  AS command,
               COALESCE(ARRAY(SELECT rolname::text FROM pg_roles WHERE oid = ANY(p.polroles)), '{}'::text[]) AS roles,
               pg_get_expr(p.polqual, p.polrelid)      AS using_expr,
               pg_get_expr(p.polwithcheck, p.polrelid) AS with_check
        FROM pg_policy p
        JOIN pg_class c ON c.oid = p.polrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        ORDER BY n.nspname, c.relname, p.polname
        "#,
    )
    .fetch_all(&state.pool)
    .await?;
    Ok(Json(PolicyList { items }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RlsToggleBody {
    table: String,
    #[serde(default)]
    schema: Option<String>,
    enabled: bool,
}

/// `POST /api/admin/rls/tables`
pub async fn toggle_rls(
    State(state): State<AppState>,
    AppJson(body): AppJson<RlsToggleBody>,
) -> Result<StatusCode> {
    validate::identifier(&body.table)?;
    let schema = body.schema.as_deref().unwrap_or("public");
    validate::identifier(schema)?;

    let verb = if body.enabled { "ENABLE" } else { "DISABLE" };
    let sql = format!(
        "ALTER TABLE {}.{} {verb} ROW LEVEL SECURITY",
        validate::quote_identifier(schema),
        validate::quote_identifier(&body.table),
    );
    sqlx::raw_sql(&sql)
        .execute(&state.pool)
        .await
        .map_err(db_error_to_bad_request)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(command: &str, roles: Vec<&str>) -> CreatePolicyBody {
        CreatePolicyBody {
            table: "documents".into(),
            policy_name: "owner_only".into(),
            schema: None,
            command: command.into(),
            roles: roles.into_iter().map(String::from).collect(),
            using: Some("owner_id = current_user_id()".into()),
            with_check: None,
        }
    }

    #[test]
    fn policy_sql_shape() {
        let sql = create_policy_sql(&body("SELECT", vec!["app_user"])).unwrap();
        assert_eq!(
            sql,
            "CREATE POLICY \"owner_only\" ON \"public\".\"documents\" FOR SELECT \
             TO \"app_user\" USING (owner_id = current_user_id())"
        );
    }

    #[test]
    fn public_role_is_not_quoted() {
        let sql = create_policy_sql(&body("ALL", vec!["PUBLIC", "app_user"])).unwrap();
        assert!(sql.contains("TO PUBLIC, \"app_user\""));
    }

    #[test]
    fn commands_outside_the_set_carry_a_doc_url() {
        let err = create_policy_sql(&body("TRUNCATE", vec![])).unwrap_err();
        match err {
            Error::BadRequestDoc { doc_url, .. } => assert_eq!(doc_url, COMMANDS_DOC_URL),
            other => panic!("expected doc-url rejection, got {other:?}"),
        }
    }

    #[test]
    fn lowercase_commands_accepted() {
        assert!(create_policy_sql(&body("select", vec![])).is_ok());
        assert!(create_policy_sql(&body("all", vec![])).is_ok());
    }

    #[test]
    fn hostile_identifiers_rejected() {
        let mut evil = body("ALL", vec![]);
        evil.table = "documents\"; DROP TABLE users; --".into();
        assert!(create_policy_sql(&evil).is_err());

        let mut evil_role = body("ALL", vec!["role; DROP ROLE admin"]);
        evil_role.roles = vec!["role; DROP ROLE admin".into()];
        assert!(create_policy_sql(&evil_role).is_err());
    }
}
