//! Relational schema model and the Schema Model Builder.

pub mod builder;
pub mod language;
pub mod model;

pub use builder::{default_name, foreign_key_name, index_name, primary_key_name, SchemaBuilder};
pub use language::{encode_language, LanguageSet};
pub use model::{
    ColumnDescriptor, ColumnRole, ComputedColumn, DerivedLink, ForeignKeyDescriptor,
    IndexDescriptor, IndexKind, NestedGroup, Subtable, SubtableLink, TableSchema,
    DERIVED_MODULE_COLUMN, DERIVED_TABLE_COLUMN, DERIVED_TYPE_COLUMN, PARENT_COLUMN,
    ROW_ID_COLUMN, SITE_COLUMN,
};
