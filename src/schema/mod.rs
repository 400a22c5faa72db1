//! Catalog introspection and the DDL classifier feeding the auto-CRUD router

pub mod cache;
pub mod ddl;

pub use cache::{ColumnInfo, SchemaCache, Snapshot, TableInfo, TableKind};
pub use ddl::is_ddl;
