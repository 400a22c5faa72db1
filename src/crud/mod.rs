//! Auto-CRUD: schema-cache-driven list/get/create/update/delete per table

pub mod handlers;
pub mod query;

pub use query::SortKey;
