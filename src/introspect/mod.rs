//! Live Schema Introspector: catalog reads and the live-schema cache.

pub mod cache;
pub mod catalog;

pub use cache::{CatalogKey, SchemaCache};
pub use catalog::{object_exists, read_columns, read_table, CatalogQuery, ObjectKind};
