//! Catalog queries and row decoding.
//!
//! Each query reads one facet of one table from the `sys.*` views, filtered
//! by schema and table name passed as `@schema` / `@table`. Rows come back in
//! a fixed shape per query and are decoded into the same descriptors the
//! schema builder produces, so desired and live tables compare directly.

use std::collections::HashMap;

use crate::error::{DbError, DbResult};
use crate::mapper::row::{Params, Row};
use crate::mapper::value::Value;
use crate::provider::connection::{Connection, Statement};
use crate::schema::model::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, IndexKind, TableSchema,
};
use crate::sql::types::ColumnType;

const COLUMNS_SQL: &str = r#"SELECT
    c.name AS column_name,
    t.name AS type_name,
    c.max_length,
    c.precision,
    c.scale,
    c.is_nullable,
    c.is_identity,
    CAST(ic.seed_value AS BIGINT) AS identity_seed,
    CAST(ic.increment_value AS BIGINT) AS identity_increment
FROM sys.columns c
JOIN sys.types t ON c.user_type_id = t.user_type_id
JOIN sys.tables tbl ON c.object_id = tbl.object_id
JOIN sys.schemas s ON tbl.schema_id = s.schema_id
LEFT JOIN sys.identity_columns ic ON ic.object_id = c.object_id AND ic.column_id = c.column_id
WHERE s.name = @schema AND tbl.name = @table
ORDER BY c.column_id"#;

const INDEXES_SQL: &str = r#"SELECT
    i.name AS index_name,
    i.is_primary_key,
    i.is_unique,
    c.name AS column_name,
    ic.key_ordinal
FROM sys.indexes i
JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
JOIN sys.tables tbl ON i.object_id = tbl.object_id
JOIN sys.schemas s ON tbl.schema_id = s.schema_id
WHERE s.name = @schema AND tbl.name = @table AND i.name IS NOT NULL AND ic.is_included_column = 0
ORDER BY i.name, ic.key_ordinal"#;

const FOREIGN_KEYS_SQL: &str = r#"SELECT
    fk.name AS fk_name,
    pc.name AS column_name,
    rt.name AS referenced_table,
    rc.name AS referenced_column,
    fk.delete_referential_action_desc AS delete_action,
    fk.update_referential_action_desc AS update_action
FROM sys.foreign_keys fk
JOIN sys.foreign_key_columns fkc ON fk.object_id = fkc.constraint_object_id
JOIN sys.tables pt ON fkc.parent_object_id = pt.object_id
JOIN sys.schemas s ON pt.schema_id = s.schema_id
JOIN sys.columns pc ON fkc.parent_object_id = pc.object_id AND fkc.parent_column_id = pc.column_id
JOIN sys.tables rt ON fkc.referenced_object_id = rt.object_id
JOIN sys.columns rc ON fkc.referenced_object_id = rc.object_id AND fkc.referenced_column_id = rc.column_id
WHERE s.name = @schema AND pt.name = @table
ORDER BY fk.name, fkc.constraint_column_id"#;

/// Kind of schema object probed by [`CatalogQuery::ObjectExists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Table,
    Procedure,
    TableType,
}

/// A catalog read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogQuery {
    /// `column_name, type_name, max_length, precision, scale, is_nullable,
    /// is_identity, identity_seed, identity_increment`
    Columns { schema: String, table: String },
    /// `index_name, is_primary_key, is_unique, column_name, key_ordinal`
    Indexes { schema: String, table: String },
    /// `fk_name, column_name, referenced_table, referenced_column,
    /// delete_action, update_action`
    ForeignKeys { schema: String, table: String },
    /// One row (`present`) when the object exists, none otherwise.
    ObjectExists {
        schema: String,
        name: String,
        kind: ObjectKind,
    },
}

impl CatalogQuery {
    pub fn columns(schema: &str, table: &str) -> Self {
        CatalogQuery::Columns {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    pub fn indexes(schema: &str, table: &str) -> Self {
        CatalogQuery::Indexes {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    pub fn foreign_keys(schema: &str, table: &str) -> Self {
        CatalogQuery::ForeignKeys {
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    pub fn object_exists(schema: &str, name: &str, kind: ObjectKind) -> Self {
        CatalogQuery::ObjectExists {
            schema: schema.to_string(),
            name: name.to_string(),
            kind,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            CatalogQuery::Columns { .. } => COLUMNS_SQL.to_string(),
            CatalogQuery::Indexes { .. } => INDEXES_SQL.to_string(),
            CatalogQuery::ForeignKeys { .. } => FOREIGN_KEYS_SQL.to_string(),
            CatalogQuery::ObjectExists { kind, .. } => match kind {
                ObjectKind::TableType => "SELECT 1 AS present\nFROM sys.table_types tt\nJOIN sys.schemas s ON tt.schema_id = s.schema_id\nWHERE s.name = @schema AND tt.name = @name".to_string(),
                ObjectKind::Table | ObjectKind::Procedure => format!(
                    "SELECT 1 AS present\nFROM sys.objects o\nJOIN sys.schemas s ON o.schema_id = s.schema_id\nWHERE s.name = @schema AND o.name = @name AND o.type = '{}'",
                    if *kind == ObjectKind::Table { "U" } else { "P" }
                ),
            },
        }
    }

    /// Parameters the query text refers to.
    pub fn params(&self) -> Params {
        match self {
            CatalogQuery::Columns { schema, table }
            | CatalogQuery::Indexes { schema, table }
            | CatalogQuery::ForeignKeys { schema, table } => Params::new()
                .with("schema", schema.as_str())
                .with("table", table.as_str()),
            CatalogQuery::ObjectExists { schema, name, .. } => Params::new()
                .with("schema", schema.as_str())
                .with("name", name.as_str()),
        }
    }
}

fn text(row: &Row, column: &str) -> DbResult<String> {
    row.get(column)
        .and_then(Value::to_text)
        .ok_or_else(|| DbError::protocol(format!("catalog row is missing {}", column)))
}

fn int(row: &Row, column: &str) -> DbResult<i64> {
    row.get(column)
        .and_then(Value::as_i64)
        .ok_or_else(|| DbError::protocol(format!("catalog row is missing {}", column)))
}

fn flag(row: &Row, column: &str) -> bool {
    row.get(column)
        .and_then(Value::as_bool_lenient)
        .unwrap_or(false)
}

/// Decode `Columns` rows.
pub fn decode_columns(rows: &[Row]) -> DbResult<Vec<ColumnDescriptor>> {
    rows.iter()
        .map(|row| {
            let name = text(row, "column_name")?;
            let type_name = text(row, "type_name")?;
            let max_length = int(row, "max_length")? as i32;
            let precision = int(row, "precision").unwrap_or(0) as u8;
            let scale = int(row, "scale").unwrap_or(0) as u8;
            let column_type = ColumnType::from_catalog(&type_name, max_length, precision, scale)
                .ok_or_else(|| {
                    DbError::protocol(format!(
                        "column {} has unsupported type {}",
                        name, type_name
                    ))
                })?;
            let mut column =
                ColumnDescriptor::new(name, column_type).with_nullable(flag(row, "is_nullable"));
            if flag(row, "is_identity") {
                let seed = int(row, "identity_seed").unwrap_or(1);
                let increment = int(row, "identity_increment").unwrap_or(1);
                column.identity = Some((seed, increment));
            }
            Ok(column)
        })
        .collect()
}

/// Decode `Indexes` rows, one row per key column.
pub fn decode_indexes(rows: &[Row]) -> DbResult<Vec<IndexDescriptor>> {
    let mut out: Vec<IndexDescriptor> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let name = text(row, "index_name")?;
        let column = text(row, "column_name")?;
        match positions.get(&name) {
            Some(&i) => out[i].columns.push(column),
            None => {
                let kind = if flag(row, "is_primary_key") {
                    IndexKind::PrimaryKey
                } else if flag(row, "is_unique") {
                    IndexKind::UniqueKey
                } else {
                    IndexKind::NonUnique
                };
                positions.insert(name.clone(), out.len());
                out.push(IndexDescriptor::new(name, vec![column], kind));
            }
        }
    }
    Ok(out)
}

/// Decode `ForeignKeys` rows, one row per column pair.
pub fn decode_foreign_keys(rows: &[Row]) -> DbResult<Vec<ForeignKeyDescriptor>> {
    let mut out: Vec<ForeignKeyDescriptor> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let name = text(row, "fk_name")?;
        let column = text(row, "column_name")?;
        let referenced_column = text(row, "referenced_column")?;
        match positions.get(&name) {
            Some(&i) => {
                out[i].columns.push(column);
                out[i].referenced_columns.push(referenced_column);
            }
            None => {
                let cascade = |col: &str| {
                    text(row, col)
                        .map(|a| a.eq_ignore_ascii_case("CASCADE"))
                        .unwrap_or(false)
                };
                positions.insert(name.clone(), out.len());
                out.push(ForeignKeyDescriptor {
                    name,
                    columns: vec![column],
                    referenced_table: text(row, "referenced_table")?,
                    referenced_columns: vec![referenced_column],
                    cascade_delete: cascade("delete_action"),
                    cascade_update: cascade("update_action"),
                });
            }
        }
    }
    Ok(out)
}

async fn run(conn: &mut dyn Connection, query: CatalogQuery) -> DbResult<Vec<Row>> {
    let params = query.params();
    Ok(conn.execute(&Statement::Catalog(query), &params).await?.rows)
}

/// Read a table's columns.
pub async fn read_columns(
    conn: &mut dyn Connection,
    schema: &str,
    table: &str,
) -> DbResult<Vec<ColumnDescriptor>> {
    decode_columns(&run(conn, CatalogQuery::columns(schema, table)).await?)
}

/// Read a table from the catalog; `None` when it does not exist.
pub async fn read_table(
    conn: &mut dyn Connection,
    schema: &str,
    table: &str,
) -> DbResult<Option<TableSchema>> {
    let columns = read_columns(conn, schema, table).await?;
    if columns.is_empty() {
        return Ok(None);
    }
    let mut live = TableSchema::new(schema, table);
    live.columns = columns;
    live.indexes = decode_indexes(&run(conn, CatalogQuery::indexes(schema, table)).await?)?;
    live.foreign_keys =
        decode_foreign_keys(&run(conn, CatalogQuery::foreign_keys(schema, table)).await?)?;
    Ok(Some(live))
}

/// Whether a table, procedure or table type exists.
pub async fn object_exists(
    conn: &mut dyn Connection,
    schema: &str,
    name: &str,
    kind: ObjectKind,
) -> DbResult<bool> {
    Ok(!run(conn, CatalogQuery::object_exists(schema, name, kind))
        .await?
        .is_empty())
}
