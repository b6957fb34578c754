//! Reads across a base table and one derived table.
//!
//! A record of a statically unknown type is read in two steps: the
//! descriptor columns of the base row name the concrete type, then base and
//! derived rows are joined on the shared key.

use super::crud::{address_columns, address_filter, select_list};
use super::KeyKind;
use crate::error::{ConfigError, Result};
use crate::mapper::row::Row;
use crate::mapper::value::Value;
use crate::schema::model::{
    TableSchema, DERIVED_MODULE_COLUMN, DERIVED_TABLE_COLUMN, DERIVED_TYPE_COLUMN,
};
use crate::sql::expr::{and_all, col, table_col, ExprExt};
use crate::sql::query::{Query, SelectExpr, TableRef};

/// Alias of the base table in [`joined_get`].
pub const BASE_ALIAS: &str = "b";
/// Alias of the derived table in [`joined_get`].
pub const DERIVED_ALIAS: &str = "d";

/// The concrete type a base row belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub table: String,
    pub type_name: String,
    pub module: String,
}

impl Descriptor {
    /// Type key (`module.type`) of the descriptor.
    pub fn type_key(&self) -> String {
        format!("{}.{}", self.module, self.type_name)
    }
}

/// Descriptor columns of one base row.
pub fn descriptor_lookup(base: &TableSchema, kind: KeyKind) -> Result<Query> {
    let address = address_columns(base, kind)?;
    Ok(Query::new()
        .top(1)
        .select(vec![
            col(DERIVED_TABLE_COLUMN),
            col(DERIVED_TYPE_COLUMN),
            col(DERIVED_MODULE_COLUMN),
        ])
        .from(TableRef::new(&base.name).with_schema(&base.schema))
        .filter(address_filter(&address, None, "")))
}

/// Decode a descriptor row; `None` when the row is not of a derived type.
pub fn decode_descriptor(row: &Row) -> Option<Descriptor> {
    let text = |column: &str| {
        row.get(column)
            .filter(|v| !matches!(v, Value::Null))
            .and_then(Value::to_text)
            .filter(|s| !s.is_empty())
    };
    Some(Descriptor {
        table: text(DERIVED_TABLE_COLUMN)?,
        type_name: text(DERIVED_TYPE_COLUMN)?,
        module: text(DERIVED_MODULE_COLUMN)?,
    })
}

/// One record of a derived type: base columns, then the derived table's own
/// columns, joined on the key.
pub fn joined_get(base: &TableSchema, derived: &TableSchema, kind: KeyKind) -> Result<Query> {
    let address = address_columns(base, kind)?;
    let on = and_all(derived.key_columns().iter().map(|k| {
        table_col(DERIVED_ALIAS, &k.name).eq(table_col(BASE_ALIAS, &k.name))
    }))
    .ok_or_else(|| ConfigError::MissingPrimaryKey {
        type_name: derived.type_key.clone(),
    })?;

    let mut select = select_list(base, Some(BASE_ALIAS));
    select.extend(
        derived
            .columns
            .iter()
            .filter(|c| !base.has_column(&c.name))
            .map(|c| SelectExpr::new(table_col(DERIVED_ALIAS, &c.name))),
    );
    select.extend(
        derived
            .computed
            .iter()
            .map(|c| SelectExpr::new(c.expr()).with_alias(&c.name)),
    );

    Ok(Query::new()
        .top(1)
        .select(select)
        .from(
            TableRef::new(&base.name)
                .with_schema(&base.schema)
                .with_alias(BASE_ALIAS),
        )
        .inner_join(
            TableRef::new(&derived.name)
                .with_schema(&derived.schema)
                .with_alias(DERIVED_ALIAS),
            on,
        )
        .filter(address_filter(&address, Some(BASE_ALIAS), "")))
}
