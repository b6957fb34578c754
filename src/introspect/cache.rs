//! Live schema cache.
//!
//! Tables read from the catalog are kept per (data source, database) until
//! the cache is invalidated. Absent tables are cached too, as `None`, so an
//! install that finds nothing does not query again before it creates.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::catalog;
use crate::config::ConnectionInfo;
use crate::error::DbResult;
use crate::provider::connection::Connection;
use crate::schema::model::{ColumnDescriptor, TableSchema};

/// `(data source, database)`, case-folded.
pub type CatalogKey = (String, String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TableKey {
    catalog: CatalogKey,
    schema: String,
    table: String,
}

impl TableKey {
    fn new(catalog: &CatalogKey, schema: &str, table: &str) -> Self {
        Self {
            catalog: catalog.clone(),
            schema: schema.to_lowercase(),
            table: table.to_lowercase(),
        }
    }
}

/// Cache of live tables.
#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: DashMap<TableKey, Option<Arc<TableSchema>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached table, reading the catalog on a miss. `None` means the table
    /// does not exist.
    pub async fn get_table(
        &self,
        info: &ConnectionInfo,
        conn: &mut dyn Connection,
        schema: &str,
        table: &str,
    ) -> DbResult<Option<Arc<TableSchema>>> {
        let key = TableKey::new(&info.catalog_key(), schema, table);
        if let Some(hit) = self.tables.get(&key) {
            return Ok(hit.value().clone());
        }

        debug!(schema, table, "reading table from catalog");
        let live = catalog::read_table(conn, schema, table).await?.map(Arc::new);
        self.tables.insert(key, live.clone());
        Ok(live)
    }

    /// Columns of a cached table; empty when the table does not exist.
    pub async fn get_columns(
        &self,
        info: &ConnectionInfo,
        conn: &mut dyn Connection,
        schema: &str,
        table: &str,
    ) -> DbResult<Vec<ColumnDescriptor>> {
        Ok(self
            .get_table(info, conn, schema, table)
            .await?
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    /// Whether a lookup for this table is cached.
    pub fn contains(&self, info: &ConnectionInfo, schema: &str, table: &str) -> bool {
        self.tables
            .contains_key(&TableKey::new(&info.catalog_key(), schema, table))
    }

    /// Drop every cached table of one database.
    pub fn invalidate(&self, info: &ConnectionInfo) {
        let catalog = info.catalog_key();
        self.tables.retain(|k, _| k.catalog != catalog);
    }

    pub fn clear(&self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
