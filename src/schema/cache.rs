//! Schema cache: the only in-memory view of table/column metadata
//!
//! Snapshots are immutable and published by a single `ArcSwap` store, so
//! readers never block and never observe a half-built snapshot. A watch
//! channel doubles as the ready barrier for the first load.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::Result;

/// Kind of relation exposed through auto-CRUD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Table,
    View,
    Matview,
}

/// A column descriptor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// A relation descriptor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
}

impl TableInfo {
    /// Qualified `schema.table` name used as the map key
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Whether the relation has a column with this name
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// An immutable snapshot of the catalog
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Qualified name → descriptor
    pub tables: BTreeMap<String, TableInfo>,
    pub built_at: DateTime<Utc>,
}

impl Snapshot {
    /// Look a table up by bare name in `public`, or by qualified name
    pub fn resolve(&self, name: &str) -> Option<&TableInfo> {
        if name.contains('.') {
            self.tables.get(name)
        } else {
            self.tables.get(&format!("public.{name}"))
        }
    }
}

/// The process-wide schema cache
pub struct SchemaCache {
    pool: PgPool,
    current: ArcSwapOption<Snapshot>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl SchemaCache {
    /// Create an empty cache; `load` must run before `get` returns data
    pub fn new(pool: PgPool) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            pool,
            current: ArcSwapOption::const_empty(),
            ready_tx,
            ready_rx,
        }
    }

    /// Current snapshot; `None` until the first successful load
    pub fn get(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    /// Block until the first load has completed
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Introspect the catalog and publish a fresh snapshot.
    ///
    /// Publication is a single store; readers keep whatever snapshot they
    /// already hold.
    pub async fn load(&self) -> Result<()> {
        let snapshot = self.introspect().await?;
        self.current.store(Some(Arc::new(snapshot)));
        self.ready_tx.send_replace(true);
        Ok(())
    }

    /// Synchronous reload used right after DDL commits
    pub async fn reload_wait(&self) -> Result<()> {
        self.load().await
    }

    async fn introspect(&self) -> Result<Snapshot> {
        #[derive(sqlx::FromRow)]
        struct ColumnRow {
            table_schema: String,
            table_name: String,
            relkind: String,
            column_name: String,
            data_type: String,
            is_nullable: bool,
            is_pk: bool,
        }

        // Tables, views and materialized views with their columns and
        // primary keys, skipping system schemas.
        let rows: Vec<ColumnRow> = sqlx::query_as(
            r#"
            SELECT
                n.nspname              AS table_schema,
                c.relname              AS table_name,
                c.relkind::text        AS relkind,
                a.attname              AS column_name,
                format_type(a.atttypid, a.atttypmod) AS data_type,
                NOT a.attnotnull       AS is_nullable,
                COALESCE(i.indisprimary, false) AS is_pk
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
            LEFT JOIN pg_index i ON i.indrelid = c.oid AND i.indisprimary
                AND a.attnum = ANY(i.indkey)
            WHERE c.relkind IN ('r', 'v', 'm')
              AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
            ORDER BY n.nspname, c.relname, a.attnum
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tables: BTreeMap<String, TableInfo> = BTreeMap::new();
        for row in rows {
            let kind = match row.relkind.as_str() {
                "v" => TableKind::View,
                "m" => TableKind::Matview,
                _ => TableKind::Table,
            };
            let key = format!("{}.{}", row.table_schema, row.table_name);
            let entry = tables.entry(key).or_insert_with(|| TableInfo {
                schema: row.table_schema.clone(),
                name: row.table_name.clone(),
                kind,
                columns: Vec::new(),
                primary_key: Vec::new(),
            });
            entry.columns.push(ColumnInfo {
                name: row.column_name.clone(),
                data_type: row.data_type,
                nullable: row.is_nullable,
            });
            if row.is_pk {
                entry.primary_key.push(row.column_name);
            }
        }

        Ok(Snapshot {
            tables,
            built_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(schema: &str, name: &str) -> TableInfo {
        TableInfo {
            schema: schema.into(),
            name: name.into(),
            kind: TableKind::Table,
            columns: vec![ColumnInfo {
                name: "id".into(),
                data_type: "uuid".into(),
                nullable: false,
            }],
            primary_key: vec!["id".into()],
        }
    }

    fn snapshot_with(tables: Vec<TableInfo>) -> Snapshot {
        Snapshot {
            tables: tables
                .into_iter()
                .map(|t| (t.qualified_name(), t))
                .collect(),
            built_at: Utc::now(),
        }
    }

    #[test]
    fn resolve_bare_names_in_public() {
        let snapshot = snapshot_with(vec![table("public", "users"), table("audit", "events")]);
        assert!(snapshot.resolve("users").is_some());
        assert!(snapshot.resolve("public.users").is_some());
        assert!(snapshot.resolve("audit.events").is_some());
        assert!(snapshot.resolve("events").is_none());
        assert!(snapshot.resolve("missing").is_none());
    }

    #[test]
    fn column_lookup() {
        let t = table("public", "users");
        assert!(t.has_column("id"));
        assert!(!t.has_column("name"));
        assert_eq!(t.qualified_name(), "public.users");
    }
}
