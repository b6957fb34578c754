//! Process-wide caches of generated artifacts.
//!
//! Built schemas are cached per (type, schema, language set) and the
//! statements generated from them per (schema fingerprint, table, kind).
//! Nothing here notices a model or catalog change: callers clear the cache
//! after install and uninstall.
//!
//! # Key Format
//!
//! ```text
//! (type key, schema, languages)          -> SchemaSet
//! (fingerprint, table, StatementKind)    -> Statement
//! ```

mod hash;
pub use hash::{compute_hash, fingerprint};

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::provider::connection::Statement;
use crate::schema::model::TableSchema;
use crate::statement::KeyKind;

/// Every table of one type plus the shape its records are read through.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSet {
    /// Tables in creation order: base before derived.
    pub tables: Vec<TableSchema>,
    /// Read shape: the type's table, or base and derived merged.
    pub shape: TableSchema,
    /// Hash of `tables`.
    pub fingerprint: String,
}

impl SchemaSet {
    pub fn new(tables: Vec<TableSchema>, shape: TableSchema) -> Result<Self> {
        let fingerprint = fingerprint(&tables).map_err(Error::Json)?;
        Ok(Self {
            tables,
            shape,
            fingerprint,
        })
    }

    /// The type's own table: the derived table of a split.
    pub fn own_table(&self) -> Option<&TableSchema> {
        self.tables.last()
    }

    /// Base table when the type is derived.
    pub fn base_table(&self) -> Option<&TableSchema> {
        match self.tables.as_slice() {
            [base, _] => Some(base),
            _ => None,
        }
    }
}

/// Statements the provider generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Get(KeyKind),
    Insert,
    Update(KeyKind),
    Delete(KeyKind),
    UpdateDerived,
    DescriptorLookup(KeyKind),
    JoinedGet(KeyKind),
    DeleteChildren,
    SelectChildren(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StatementKey {
    fingerprint: String,
    table: String,
    kind: StatementKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SchemaKey {
    type_key: String,
    schema: String,
    languages: String,
}

/// Cache of built schemas and generated statements.
#[derive(Debug, Default)]
pub struct StatementCache {
    schemas: DashMap<SchemaKey, Arc<SchemaSet>>,
    statements: DashMap<StatementKey, Arc<Statement>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached schema set, building it on a miss.
    pub fn schema_set(
        &self,
        type_key: &str,
        schema: &str,
        languages: &str,
        build: impl FnOnce() -> Result<SchemaSet>,
    ) -> Result<Arc<SchemaSet>> {
        let key = SchemaKey {
            type_key: type_key.to_string(),
            schema: schema.to_string(),
            languages: languages.to_string(),
        };
        if let Some(hit) = self.schemas.get(&key) {
            return Ok(hit.value().clone());
        }
        let set = Arc::new(build()?);
        debug!(type_key, schema, tables = set.tables.len(), "cached schema set");
        self.schemas.insert(key, set.clone());
        Ok(set)
    }

    /// Cached statement, generating it on a miss.
    pub fn statement(
        &self,
        set: &SchemaSet,
        table: &str,
        kind: StatementKind,
        build: impl FnOnce() -> Result<Statement>,
    ) -> Result<Arc<Statement>> {
        let key = StatementKey {
            fingerprint: set.fingerprint.clone(),
            table: table.to_string(),
            kind,
        };
        if let Some(hit) = self.statements.get(&key) {
            return Ok(hit.value().clone());
        }
        let statement = Arc::new(build()?);
        self.statements.insert(key, statement.clone());
        Ok(statement)
    }

    /// Drop everything.
    pub fn clear(&self) {
        debug!(
            schemas = self.schemas.len(),
            statements = self.statements.len(),
            "clearing statement cache"
        );
        self.schemas.clear();
        self.statements.clear();
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ddl::DropTable;

    fn set(name: &str) -> SchemaSet {
        let table = TableSchema::new("dbo", name);
        SchemaSet::new(vec![table.clone()], table).unwrap()
    }

    #[test]
    fn test_fingerprint_follows_tables() {
        assert_eq!(set("A").fingerprint, set("A").fingerprint);
        assert_ne!(set("A").fingerprint, set("B").fingerprint);
        assert!(set("A").base_table().is_none());
    }

    #[test]
    fn test_statements_are_built_once() {
        let cache = StatementCache::new();
        let s = set("A");
        let mut builds = 0;
        for _ in 0..3 {
            cache
                .statement(&s, "A", StatementKind::Insert, || {
                    builds += 1;
                    Ok(Statement::Ddl(DropTable::new("A").into()))
                })
                .unwrap();
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_schema_set_errors_are_not_cached() {
        let cache = StatementCache::new();
        let err = cache.schema_set("M.T", "dbo", "en", || {
            Err(Error::Internal("boom".into()))
        });
        assert!(err.is_err());
        let ok = cache.schema_set("M.T", "dbo", "en", || Ok(set("T"))).unwrap();
        assert_eq!(ok.shape.name, "T");
    }
}
