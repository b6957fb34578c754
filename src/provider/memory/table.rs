//! Tables of the in-memory engine.

use std::cmp::Ordering;

use crate::error::{DbError, DbResult, ERR_NULL_INSERT};
use crate::mapper::value::Value;
use crate::schema::model::{ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, IndexKind};
use crate::sql::ddl::ColumnDef;
use crate::sql::types::ColumnType;

/// SQL Server: string or binary data would be truncated.
pub const ERR_TRUNCATION: i32 = 2628;
/// SQL Server: conversion failed.
pub const ERR_CONVERSION: i32 = 245;

/// A column with its default constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct MemColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub identity: Option<(i64, i64)>,
    /// `(constraint name, value)`.
    pub default: Option<(String, Value)>,
}

impl MemColumn {
    pub fn descriptor(&self) -> ColumnDescriptor {
        let mut c = ColumnDescriptor::new(&self.name, self.column_type).with_nullable(self.nullable);
        c.identity = self.identity;
        c
    }

    /// Value as stored in this column.
    pub fn store(&self, table: &str, value: &Value) -> DbResult<Value> {
        let stored = value.coerce_to(&self.column_type).ok_or_else(|| {
            DbError::native(
                ERR_CONVERSION,
                format!(
                    "Conversion failed when converting the {} value '{}' to data type {} (column '{}').",
                    value.type_name(),
                    value,
                    self.column_type,
                    self.name
                ),
            )
        })?;
        if stored.is_null() && !self.nullable {
            return Err(DbError::native(
                ERR_NULL_INSERT,
                format!(
                    "Cannot insert the value NULL into column '{}', table '{}'; column does not allow nulls.",
                    self.name, table
                ),
            ));
        }
        if let (ColumnType::Text(Some(max)), Value::Text(s)) = (&self.column_type, &stored) {
            if s.chars().count() > *max as usize {
                return Err(DbError::native(
                    ERR_TRUNCATION,
                    format!(
                        "String or binary data would be truncated in table '{}', column '{}'.",
                        table, self.name
                    ),
                ));
            }
        }
        Ok(stored)
    }
}

impl From<ColumnDescriptor> for MemColumn {
    fn from(c: ColumnDescriptor) -> Self {
        Self {
            name: c.name,
            column_type: c.column_type,
            nullable: c.nullable,
            identity: c.identity,
            default: None,
        }
    }
}

impl From<&ColumnDef> for MemColumn {
    fn from(def: &ColumnDef) -> Self {
        Self {
            name: def.name.clone(),
            column_type: def.data_type,
            nullable: def.nullable,
            identity: def.identity,
            default: None,
        }
    }
}

/// A foreign key with the schema of the referenced table.
#[derive(Debug, Clone, PartialEq)]
pub struct MemForeignKey {
    pub descriptor: ForeignKeyDescriptor,
    pub referenced_schema: String,
}

/// One table: definition and rows.
#[derive(Debug, Clone, PartialEq)]
pub struct MemTable {
    pub schema: String,
    pub name: String,
    pub columns: Vec<MemColumn>,
    pub indexes: Vec<IndexDescriptor>,
    pub foreign_keys: Vec<MemForeignKey>,
    pub rows: Vec<Vec<Value>>,
    /// Last identity value handed out.
    pub last_identity: Option<i64>,
}

impl MemTable {
    pub fn new(schema: &str, name: &str, columns: Vec<MemColumn>) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            columns,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            rows: Vec::new(),
            last_identity: None,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_indexes(&self, names: &[String]) -> Option<Vec<usize>> {
        names.iter().map(|n| self.column_index(n)).collect()
    }

    pub fn identity_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.identity.is_some())
    }

    pub fn primary_key(&self) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.kind == IndexKind::PrimaryKey)
    }

    /// Next identity value; advances the counter.
    pub fn next_identity(&mut self) -> Option<i64> {
        let (seed, increment) = self.columns.iter().find_map(|c| c.identity)?;
        let next = match self.last_identity {
            Some(last) => last + increment,
            None => seed,
        };
        self.last_identity = Some(next);
        Some(next)
    }

    /// Whether an index or foreign key of this table uses the column.
    pub fn dependent_constraint(&self, column: &str) -> Option<&str> {
        self.indexes
            .iter()
            .find(|i| i.touches(column))
            .map(|i| i.name.as_str())
            .or_else(|| {
                self.foreign_keys
                    .iter()
                    .find(|fk| fk.descriptor.touches(column))
                    .map(|fk| fk.descriptor.name.as_str())
            })
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(column))
                    .and_then(|c| c.default.as_ref())
                    .map(|(name, _)| name.as_str())
            })
    }

    /// Whether the column list is the primary key or a unique index.
    pub fn is_candidate_key(&self, columns: &[String]) -> bool {
        self.indexes.iter().any(|i| {
            i.kind != IndexKind::NonUnique
                && i.columns.len() == columns.len()
                && i.columns
                    .iter()
                    .zip(columns)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
        })
    }

    /// First pair of rows sharing a key, as row positions.
    pub fn find_duplicate(&self, columns: &[usize]) -> Option<(usize, usize)> {
        for (i, a) in self.rows.iter().enumerate() {
            for (j, b) in self.rows.iter().enumerate().skip(i + 1) {
                if same_key(a, b, columns) {
                    return Some((i, j));
                }
            }
        }
        None
    }

    /// Rows whose `columns` equal `key`.
    pub fn rows_matching(&self, columns: &[usize], key: &[Value]) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                columns
                    .iter()
                    .zip(key)
                    .all(|(&c, k)| row[c].sql_cmp(k) == Some(Ordering::Equal))
            })
            .map(|(i, _)| i)
            .collect()
    }
}

/// Key equality for unique checks: NULLs compare equal to each other.
pub fn same_key(a: &[Value], b: &[Value], columns: &[usize]) -> bool {
    columns.iter().all(|&c| match (&a[c], &b[c]) {
        (Value::Null, Value::Null) => true,
        (x, y) => x.sql_cmp(y) == Some(Ordering::Equal),
    })
}

/// Project a row onto key columns.
pub fn key_of(row: &[Value], columns: &[usize]) -> Vec<Value> {
    columns.iter().map(|&c| row[c].clone()).collect()
}
