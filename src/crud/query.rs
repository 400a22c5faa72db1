//! Query assembly for the auto-CRUD surface
//!
//! All row data moves through `to_jsonb`/`jsonb_populate_record`, so the
//! statements stay fully parameterised no matter what columns a table
//! has. Identifiers are validated against the schema snapshot before
//! they are quoted into SQL; the `filter` fragment is the one
//! deliberately opaque input, scoped to the table by the surrounding
//! parentheses.

use crate::error::{Error, Result};
use crate::schema::TableInfo;
use crate::validate;

/// A parsed `sort` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

/// Parse a `sort` parameter (`[-]column` list, comma-separated) against
/// the table's column set
pub fn parse_sort(raw: &str, table: &TableInfo) -> Result<Vec<SortKey>> {
    let mut keys = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (column, descending) = match part.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (part, false),
        };
        validate::identifier(column)?;
        if !table.has_column(column) {
            return Err(Error::bad_request(format!(
                "unknown sort column {column:?}"
            )));
        }
        keys.push(SortKey {
            column: column.to_string(),
            descending,
        });
    }
    Ok(keys)
}

fn qualified(table: &TableInfo) -> String {
    format!(
        "{}.{}",
        validate::quote_identifier(&table.schema),
        validate::quote_identifier(&table.name)
    )
}

fn order_clause(sort: &[SortKey]) -> String {
    if sort.is_empty() {
        return String::new();
    }
    let keys: Vec<String> = sort
        .iter()
        .map(|k| {
            format!(
                "{} {}",
                validate::quote_identifier(&k.column),
                if k.descending { "DESC" } else { "ASC" }
            )
        })
        .collect();
    format!(" ORDER BY {}", keys.join(", "))
}

fn where_clause(filter: Option<&str>) -> String {
    match filter {
        Some(f) if !f.trim().is_empty() => format!(" WHERE ({})", f.trim()),
        _ => String::new(),
    }
}

/// `SELECT to_jsonb(t) …` for the list operation; binds: $1 limit, $2 offset
pub fn list_sql(table: &TableInfo, filter: Option<&str>, sort: &[SortKey]) -> String {
    format!(
        "SELECT to_jsonb(t) FROM {} t{}{} LIMIT $1 OFFSET $2",
        qualified(table),
        where_clause(filter),
        order_clause(sort),
    )
}

/// `SELECT count(*) …` matching [`list_sql`]'s filter
pub fn count_sql(table: &TableInfo, filter: Option<&str>) -> String {
    format!(
        "SELECT count(*) FROM {} t{}",
        qualified(table),
        where_clause(filter),
    )
}

/// Single-row fetch by primary key; binds: $1 id (text compared)
pub fn get_sql(table: &TableInfo, pk: &str) -> String {
    format!(
        "SELECT to_jsonb(t) FROM {} t WHERE {}::text = $1",
        qualified(table),
        validate::quote_identifier(pk),
    )
}

/// Parameterised insert of the given columns; binds: $1 record.
///
/// Only the body's columns are named, so omitted columns keep their
/// defaults instead of receiving explicit NULLs.
pub fn insert_sql(table: &TableInfo, columns: &[String]) -> String {
    let name = qualified(table);
    let targets: Vec<String> = columns
        .iter()
        .map(|c| validate::quote_identifier(c))
        .collect();
    let list = targets.join(", ");
    format!(
        "INSERT INTO {name} ({list}) SELECT {list} FROM jsonb_populate_record(NULL::{name}, $1) \
         RETURNING to_jsonb({})",
        validate::quote_identifier(&table.name),
    )
}

/// Parameterised update of the given columns; binds: $1 record, $2 id
pub fn update_sql(table: &TableInfo, pk: &str, columns: &[String]) -> String {
    let name = qualified(table);
    let targets: Vec<String> = columns
        .iter()
        .map(|c| validate::quote_identifier(c))
        .collect();
    let sources = targets.join(", ");
    format!(
        "UPDATE {name} SET ({}) = (SELECT {} FROM jsonb_populate_record(NULL::{name}, $1)) \
         WHERE {}::text = $2 RETURNING to_jsonb({})",
        targets.join(", "),
        sources,
        validate::quote_identifier(pk),
        validate::quote_identifier(&table.name),
    )
}

/// Delete by primary key; binds: $1 id
pub fn delete_sql(table: &TableInfo, pk: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {}::text = $1 RETURNING to_jsonb({})",
        qualified(table),
        validate::quote_identifier(pk),
        validate::quote_identifier(&table.name),
    )
}

/// The record columns an incoming body may set, validated against the
/// table. Unknown fields are an error, not silently dropped.
pub fn body_columns(
    body: &serde_json::Value,
    table: &TableInfo,
) -> Result<Vec<String>> {
    let object = body
        .as_object()
        .ok_or_else(|| Error::bad_request("record body must be a JSON object"))?;
    if object.is_empty() {
        return Err(Error::bad_request("record body must not be empty"));
    }
    let mut columns = Vec::with_capacity(object.len());
    for key in object.keys() {
        if !table.has_column(key) {
            return Err(Error::bad_request(format!(
                "unknown column {key:?} for table {}",
                table.name
            )));
        }
        columns.push(key.clone());
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, TableKind};

    fn users_table() -> TableInfo {
        TableInfo {
            schema: "public".into(),
            name: "users".into(),
            kind: TableKind::Table,
            columns: ["id", "name", "email", "created_at"]
                .iter()
                .map(|n| ColumnInfo {
                    name: n.to_string(),
                    data_type: "text".into(),
                    nullable: true,
                })
                .collect(),
            primary_key: vec!["id".into()],
        }
    }

    #[test]
    fn sort_parsing() {
        let table = users_table();
        let keys = parse_sort("-created_at,name", &table).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys[0].descending);
        assert_eq!(keys[0].column, "created_at");
        assert!(!keys[1].descending);

        assert!(parse_sort("missing_column", &table).is_err());
        assert!(parse_sort("name; DROP TABLE users", &table).is_err());
        assert!(parse_sort("", &table).unwrap().is_empty());
    }

    #[test]
    fn list_sql_shape() {
        let table = users_table();
        let sort = parse_sort("-created_at", &table).unwrap();
        let sql = list_sql(&table, Some("email LIKE '%@example.com'"), &sort);
        assert_eq!(
            sql,
            "SELECT to_jsonb(t) FROM \"public\".\"users\" t WHERE (email LIKE '%@example.com') \
             ORDER BY \"created_at\" DESC LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn list_sql_without_filter_or_sort() {
        let table = users_table();
        let sql = list_sql(&table, None, &[]);
        assert_eq!(
            sql,
            "SELECT to_jsonb(t) FROM \"public\".\"users\" t LIMIT $1 OFFSET $2"
        );
    }

    #[test]
    fn insert_sql_names_only_body_columns() {
        let table = users_table();
        let sql = insert_sql(&table, &["name".into(), "email".into()]);
        assert!(sql.starts_with("INSERT INTO \"public\".\"users\" (\"name\", \"email\")"));
        assert!(sql.contains("SELECT \"name\", \"email\" FROM jsonb_populate_record(NULL::\"public\".\"users\", $1)"));
        assert!(sql.contains("RETURNING to_jsonb(\"users\")"));
        // omitted columns (id, created_at) are never named, so defaults apply
        assert!(!sql.contains("\"id\""));
    }

    #[test]
    fn update_sql_targets_only_body_columns() {
        let table = users_table();
        let sql = update_sql(&table, "id", &["name".into(), "email".into()]);
        assert!(sql.contains("SET (\"name\", \"email\") ="));
        assert!(sql.contains("WHERE \"id\"::text = $2"));
    }

    #[test]
    fn body_column_validation() {
        let table = users_table();
        let ok = body_columns(
            &serde_json::json!({"name": "Charlie", "email": "c@example.com"}),
            &table,
        )
        .unwrap();
        assert_eq!(ok, vec!["email".to_string(), "name".to_string()]);

        assert!(body_columns(&serde_json::json!({"nope": 1}), &table).is_err());
        assert!(body_columns(&serde_json::json!({}), &table).is_err());
        assert!(body_columns(&serde_json::json!([1, 2]), &table).is_err());
    }
}
