//! Schema diffing.
//!
//! Compares a desired table against its live counterpart by name: what the
//! desired table has and the live one lacks is added, the reverse is removed,
//! and same-named entries with different definitions are altered. Names are
//! compared case-insensitively, the way the catalog resolves them.

use crate::schema::model::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableSchema,
};

/// A column whose definition changed.
#[derive(Debug, Clone, PartialEq)]
pub struct AlteredColumn {
    pub live: ColumnDescriptor,
    pub desired: ColumnDescriptor,
}

impl AlteredColumn {
    /// Identity cannot be switched by ALTER COLUMN: the column is rebuilt.
    pub fn needs_rebuild(&self) -> bool {
        self.live.is_identity() != self.desired.is_identity()
    }

    /// NULL values must be replaced before the ALTER.
    pub fn becomes_required(&self) -> bool {
        self.live.nullable && !self.desired.nullable
    }
}

/// Differences between a desired table and the live table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDiff {
    pub added_columns: Vec<ColumnDescriptor>,
    pub removed_columns: Vec<ColumnDescriptor>,
    pub altered_columns: Vec<AlteredColumn>,
    /// New indexes, including new definitions of changed ones.
    pub added_indexes: Vec<IndexDescriptor>,
    /// Indexes that disappeared or whose definition changed.
    pub removed_indexes: Vec<IndexDescriptor>,
    pub added_foreign_keys: Vec<ForeignKeyDescriptor>,
    pub removed_foreign_keys: Vec<ForeignKeyDescriptor>,
}

/// Entries of `a` with no same-named entry in `b`.
fn missing_from<'a, T>(a: &'a [T], b: &[T], name: impl Fn(&T) -> &str) -> Vec<&'a T> {
    let mut out = Vec::new();
    for x in a {
        if !b.iter().any(|y| name(x).eq_ignore_ascii_case(name(y))) {
            out.push(x);
        }
    }
    out
}

/// Pairs of same-named entries, in the order of `a`.
fn matched<'a, T>(a: &'a [T], b: &'a [T], name: impl Fn(&T) -> &str) -> Vec<(&'a T, &'a T)> {
    let mut out = Vec::new();
    for x in a {
        if let Some(y) = b.iter().find(|y| name(x).eq_ignore_ascii_case(name(*y))) {
            out.push((x, y));
        }
    }
    out
}

fn col_name(c: &ColumnDescriptor) -> &str {
    &c.name
}

fn idx_name(i: &IndexDescriptor) -> &str {
    &i.name
}

fn fk_name(f: &ForeignKeyDescriptor) -> &str {
    &f.name
}

impl TableDiff {
    pub fn compute(desired: &TableSchema, live: &TableSchema) -> Self {
        let mut diff = TableDiff {
            added_columns: missing_from(&desired.columns, &live.columns, col_name)
                .into_iter()
                .cloned()
                .collect(),
            removed_columns: missing_from(&live.columns, &desired.columns, col_name)
                .into_iter()
                .cloned()
                .collect(),
            altered_columns: matched(&desired.columns, &live.columns, col_name)
                .into_iter()
                .filter(|(d, l)| !d.same_definition(l))
                .map(|(d, l)| AlteredColumn {
                    live: l.clone(),
                    desired: d.clone(),
                })
                .collect(),
            ..Default::default()
        };

        diff.added_indexes = missing_from(&desired.indexes, &live.indexes, idx_name)
            .into_iter()
            .cloned()
            .collect();
        diff.removed_indexes = missing_from(&live.indexes, &desired.indexes, idx_name)
            .into_iter()
            .cloned()
            .collect();
        for (d, l) in matched(&desired.indexes, &live.indexes, idx_name) {
            if !d.same_definition(l) {
                diff.removed_indexes.push(l.clone());
                diff.added_indexes.push(d.clone());
            }
        }

        diff.added_foreign_keys =
            missing_from(&desired.foreign_keys, &live.foreign_keys, fk_name)
                .into_iter()
                .cloned()
                .collect();
        diff.removed_foreign_keys =
            missing_from(&live.foreign_keys, &desired.foreign_keys, fk_name)
                .into_iter()
                .cloned()
                .collect();
        for (d, l) in matched(&desired.foreign_keys, &live.foreign_keys, fk_name) {
            if !d.same_definition(l) {
                diff.removed_foreign_keys.push(l.clone());
                diff.added_foreign_keys.push(d.clone());
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.altered_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.removed_indexes.is_empty()
            && self.added_foreign_keys.is_empty()
            && self.removed_foreign_keys.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added_columns.len()
            + self.removed_columns.len()
            + self.altered_columns.len()
            + self.added_indexes.len()
            + self.removed_indexes.len()
            + self.added_foreign_keys.len()
            + self.removed_foreign_keys.len()
    }

    /// Columns whose physical storage goes away or changes.
    pub fn disturbed_columns(&self) -> impl Iterator<Item = &str> {
        self.removed_columns
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.altered_columns.iter().map(|a| a.live.name.as_str()))
    }
}
