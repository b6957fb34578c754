//! Statement execution for the in-memory engine.
//!
//! A [`Database`] interprets structured statements directly. Writes are
//! atomic per statement: a failing statement leaves the database as it was.
//! Constraint failures carry the error numbers SQL Server reports.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::eval::{Scope, Source};
use super::table::{key_of, same_key, MemColumn, MemForeignKey, MemTable, ERR_CONVERSION};
use crate::error::{
    DbError, DbResult, ERR_FOREIGN_KEY, ERR_INVALID_COLUMN, ERR_INVALID_OBJECT, ERR_OBJECT_EXISTS,
    ERR_UNIQUE_CONSTRAINT, ERR_UNIQUE_INDEX,
};
use crate::introspect::catalog::{CatalogQuery, ObjectKind};
use crate::mapper::row::{Params, Row};
use crate::mapper::value::Value;
use crate::provider::connection::{ExecResult, Statement};
use crate::schema::model::{ForeignKeyDescriptor, IndexDescriptor, IndexKind};
use crate::sql::ddl::{
    AlterAction, AlterTable, ColumnDef, CreateIndex, CreateProcedure, CreateTable,
    CreateTableType, DdlStatement, DropIndex, DropProcedure, DropTable, DropType, ParamKind,
    ReferentialAction, TableConstraint,
};
use crate::sql::dml::{Delete, Insert, InsertSource, Update};
use crate::sql::expr::Expr;
use crate::sql::query::{JoinType, Query, SortDir, TableRef};

/// Schema of unqualified names.
pub const DEFAULT_SCHEMA: &str = "dbo";

type ObjectKey = (String, String);

fn object_key(schema: Option<&str>, name: &str) -> ObjectKey {
    (
        schema.unwrap_or(DEFAULT_SCHEMA).to_lowercase(),
        name.to_lowercase(),
    )
}

fn display_name(schema: Option<&str>, name: &str) -> String {
    format!("{}.{}", schema.unwrap_or(DEFAULT_SCHEMA), name)
}

fn invalid_object(schema: Option<&str>, name: &str) -> DbError {
    DbError::native(
        ERR_INVALID_OBJECT,
        format!("Invalid object name '{}'.", display_name(schema, name)),
    )
}

fn invalid_column(name: &str) -> DbError {
    DbError::native(ERR_INVALID_COLUMN, format!("Invalid column name '{}'.", name))
}

fn object_exists(name: &str) -> DbError {
    DbError::native(
        ERR_OBJECT_EXISTS,
        format!("There is already an object named '{}' in the database.", name),
    )
}

fn format_key(key: &[Value]) -> String {
    key.iter().map(Value::to_string).collect::<Vec<_>>().join(", ")
}

fn columns_of(table: &MemTable, names: &[String]) -> DbResult<Vec<usize>> {
    names
        .iter()
        .map(|n| table.column_index(n).ok_or_else(|| invalid_column(n)))
        .collect()
}

fn same_columns(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

/// NULL sorts first.
fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.sql_cmp(b).unwrap_or(Ordering::Equal),
    }
}

fn is_count(expr: &Expr) -> bool {
    matches!(expr, Expr::Function { name, .. } if name.eq_ignore_ascii_case("COUNT"))
}

fn reference_conflict(verb: &str, fk: &ForeignKeyDescriptor, child: &MemTable) -> DbError {
    DbError::native(
        ERR_FOREIGN_KEY,
        format!(
            "The {} statement conflicted with the REFERENCE constraint \"{}\". The conflict occurred in table \"{}\", column '{}'.",
            verb,
            fk.name,
            child.qualified_name(),
            fk.columns.join(", ")
        ),
    )
}

/// One database: tables, table types and procedures.
#[derive(Debug, Clone, Default)]
pub struct Database {
    tables: BTreeMap<ObjectKey, MemTable>,
    types: BTreeMap<ObjectKey, CreateTableType>,
    procedures: BTreeMap<ObjectKey, CreateProcedure>,
    log: Vec<String>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, schema: &str, name: &str) -> Option<&MemTable> {
        self.tables.get(&object_key(Some(schema), name))
    }

    /// Qualified names of all tables.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.values().map(MemTable::qualified_name).collect()
    }

    pub fn row_count(&self, schema: &str, name: &str) -> Option<usize> {
        self.table(schema, name).map(|t| t.rows.len())
    }

    /// Rows of a table in storage order; empty when the table is missing.
    pub fn rows(&self, schema: &str, name: &str) -> Vec<Row> {
        self.table(schema, name)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|r| {
                        Row::from_pairs(
                            t.columns.iter().map(|c| c.name.clone()).zip(r.iter().cloned()),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_procedure(&self, schema: &str, name: &str) -> bool {
        self.procedures.contains_key(&object_key(Some(schema), name))
    }

    pub fn has_type(&self, schema: &str, name: &str) -> bool {
        self.types.contains_key(&object_key(Some(schema), name))
    }

    /// T-SQL text of every statement executed so far.
    pub fn statements(&self) -> &[String] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn execute(&mut self, statement: &Statement, params: &Params) -> DbResult<ExecResult> {
        self.log.push(statement.to_sql());
        match statement {
            Statement::Query(q) => return Ok(ExecResult::rows(self.query(q, params)?)),
            Statement::Catalog(c) => return Ok(ExecResult::rows(self.catalog(c))),
            _ => {}
        }

        let snapshot = (
            self.tables.clone(),
            self.types.clone(),
            self.procedures.clone(),
        );
        let result = match statement {
            Statement::Insert(i) => self.insert(i, params),
            Statement::Update(u) => self.update(u, params),
            Statement::Delete(d) => self.delete(d, params),
            Statement::Ddl(d) => self.ddl(d).map(|()| ExecResult::default()),
            Statement::Query(_) | Statement::Catalog(_) => Ok(ExecResult::default()),
        };
        if result.is_err() {
            (self.tables, self.types, self.procedures) = snapshot;
        }
        result
    }

    fn lookup(&self, key: &ObjectKey) -> DbResult<&MemTable> {
        self.tables
            .get(key)
            .ok_or_else(|| invalid_object(Some(&key.0), &key.1))
    }

    fn lookup_mut(&mut self, key: &ObjectKey) -> DbResult<&mut MemTable> {
        self.tables
            .get_mut(key)
            .ok_or_else(|| invalid_object(Some(&key.0), &key.1))
    }

    fn resolve(&self, table: &TableRef) -> DbResult<&MemTable> {
        if table.is_variable() {
            return Err(DbError::protocol(format!(
                "table variable {} is only valid inside a procedure",
                table.table
            )));
        }
        self.tables
            .get(&object_key(table.schema.as_deref(), &table.table))
            .ok_or_else(|| invalid_object(table.schema.as_deref(), &table.table))
    }

    /// Foreign keys of any table referencing the table at `key`.
    fn referencing(&self, key: &ObjectKey) -> Vec<(ObjectKey, MemForeignKey)> {
        self.tables
            .iter()
            .flat_map(|(child, t)| {
                t.foreign_keys
                    .iter()
                    .filter(|fk| {
                        object_key(Some(&fk.referenced_schema), &fk.descriptor.referenced_table)
                            == *key
                    })
                    .map(move |fk| (child.clone(), fk.clone()))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // SELECT
    // ------------------------------------------------------------------

    fn query(&self, query: &Query, params: &Params) -> DbResult<Vec<Row>> {
        let mut sources: Vec<(&str, &MemTable)> = Vec::new();
        if let Some(from) = &query.from {
            sources.push((from.reference_name(), self.resolve(from)?));
        } else if !query.joins.is_empty() {
            return Err(DbError::protocol("JOIN without FROM"));
        }
        for join in &query.joins {
            sources.push((join.table.reference_name(), self.resolve(&join.table)?));
        }

        let mut combos: Vec<Vec<Option<usize>>> = match sources.first() {
            Some((_, t)) => (0..t.rows.len()).map(|i| vec![Some(i)]).collect(),
            None => vec![vec![]],
        };
        for (n, join) in query.joins.iter().enumerate() {
            let joined = sources[n + 1].1;
            let mut next = Vec::new();
            for combo in combos {
                let mut matched = false;
                for i in 0..joined.rows.len() {
                    let mut candidate = combo.clone();
                    candidate.push(Some(i));
                    if scope(&sources, &candidate, params).truth(&join.on)? == Some(true) {
                        next.push(candidate);
                        matched = true;
                    }
                }
                if !matched && join.join_type == JoinType::Left {
                    let mut candidate = combo;
                    candidate.push(None);
                    next.push(candidate);
                }
            }
            combos = next;
        }

        if let Some(predicate) = &query.where_clause {
            let mut kept = Vec::with_capacity(combos.len());
            for combo in combos {
                if scope(&sources, &combo, params).truth(predicate)? == Some(true) {
                    kept.push(combo);
                }
            }
            combos = kept;
        }

        if query.select.iter().any(|s| is_count(&s.expr)) {
            let mut row = Row::new();
            for item in &query.select {
                let args = match &item.expr {
                    Expr::Function { args, .. } if is_count(&item.expr) => args,
                    _ => {
                        return Err(DbError::protocol(
                            "only COUNT may appear in an aggregate select list",
                        ))
                    }
                };
                let count = match args.first() {
                    None | Some(Expr::Star { .. }) => combos.len(),
                    Some(arg) => {
                        let mut n = 0;
                        for combo in &combos {
                            if !scope(&sources, combo, params).eval(arg)?.is_null() {
                                n += 1;
                            }
                        }
                        n
                    }
                };
                row.push(item.output_name().unwrap_or(""), Value::Int32(count as i32));
            }
            return Ok(vec![row]);
        }

        if !query.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(combos.len());
            for combo in combos {
                let s = scope(&sources, &combo, params);
                let keys = query
                    .order_by
                    .iter()
                    .map(|o| s.eval(&o.expr))
                    .collect::<DbResult<Vec<_>>>()?;
                keyed.push((keys, combo));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for ((x, y), o) in a.iter().zip(b).zip(&query.order_by) {
                    let ord = match o.dir {
                        SortDir::Asc => sort_order(x, y),
                        SortDir::Desc => sort_order(y, x),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            combos = keyed.into_iter().map(|(_, c)| c).collect();
        }

        let mut page: Box<dyn Iterator<Item = Vec<Option<usize>>>> = Box::new(combos.into_iter());
        if let Some(lo) = &query.limit_offset {
            page = Box::new(page.skip(lo.offset.unwrap_or(0) as usize));
            if let Some(limit) = lo.limit {
                page = Box::new(page.take(limit as usize));
            }
        }
        if let Some(top) = query.top {
            page = Box::new(page.take(top as usize));
        }

        let mut out = Vec::new();
        for combo in page {
            let s = scope(&sources, &combo, params);
            let mut row = Row::new();
            for item in &query.select {
                match &item.expr {
                    Expr::Star { table } => {
                        for (k, (name, t)) in sources.iter().enumerate().take(combo.len()) {
                            if table.as_deref().is_some_and(|want| !want.eq_ignore_ascii_case(name)) {
                                continue;
                            }
                            for (ci, c) in t.columns.iter().enumerate() {
                                let value = combo[k]
                                    .map(|i| t.rows[i][ci].clone())
                                    .unwrap_or(Value::Null);
                                row.push(c.name.clone(), value);
                            }
                        }
                    }
                    expr => row.push(item.output_name().unwrap_or(""), s.eval(expr)?),
                }
            }
            out.push(row);
        }
        Ok(out)
    }

    fn matching(
        &self,
        table: &MemTable,
        predicate: Option<&Expr>,
        params: &Params,
    ) -> DbResult<Vec<usize>> {
        let mut out = Vec::new();
        for (i, row) in table.rows.iter().enumerate() {
            let keep = match predicate {
                None => true,
                Some(p) => {
                    let s = Scope::new(params).with(Source {
                        name: &table.name,
                        table,
                        row: Some(row),
                    });
                    s.truth(p)? == Some(true)
                }
            };
            if keep {
                out.push(i);
            }
        }
        Ok(out)
    }

    fn output_rows(table: &MemTable, columns: &[String], rows: &[Vec<Value>]) -> DbResult<Vec<Row>> {
        if columns.is_empty() {
            return Ok(vec![]);
        }
        let positions = columns_of(table, columns)?;
        Ok(rows
            .iter()
            .map(|row| {
                Row::from_pairs(
                    positions
                        .iter()
                        .map(|&p| (table.columns[p].name.clone(), row[p].clone())),
                )
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // DML
    // ------------------------------------------------------------------

    fn insert(&mut self, insert: &Insert, params: &Params) -> DbResult<ExecResult> {
        let key = object_key(insert.schema.as_deref(), &insert.table);
        let source: Vec<Vec<Value>> = match &insert.source {
            InsertSource::Values(rows) => {
                let s = Scope::new(params);
                rows.iter()
                    .map(|r| r.iter().map(|e| s.eval(e)).collect::<DbResult<Vec<_>>>())
                    .collect::<DbResult<_>>()?
            }
            InsertSource::Query(q) => self
                .query(q, params)?
                .into_iter()
                .map(|r| r.values().to_vec())
                .collect(),
        };

        let table = self.lookup_mut(&key)?;
        let positions = columns_of(table, &insert.columns)?;
        if let Some(&p) = positions.iter().find(|&&p| table.columns[p].identity.is_some()) {
            return Err(DbError::native(
                544,
                format!(
                    "Cannot insert explicit value for identity column '{}' in table '{}' when IDENTITY_INSERT is set to OFF.",
                    table.columns[p].name, table.name
                ),
            ));
        }

        let start = table.rows.len();
        for values in source {
            if values.len() != positions.len() {
                return Err(DbError::native(
                    110,
                    "There are fewer columns in the INSERT statement than values specified in the VALUES clause.",
                ));
            }
            let identity = match table.identity_index() {
                Some(_) => table.next_identity(),
                None => None,
            };
            let mut row = Vec::with_capacity(table.columns.len());
            for (i, column) in table.columns.iter().enumerate() {
                let value = match positions.iter().position(|&p| p == i) {
                    Some(k) => values[k].clone(),
                    None if column.identity.is_some() => identity.map(Value::Int64).unwrap_or_default(),
                    None => column.default.as_ref().map(|(_, v)| v.clone()).unwrap_or_default(),
                };
                row.push(column.store(&table.name, &value)?);
            }
            table.rows.push(row);
        }
        let inserted: Vec<usize> = (start..table.rows.len()).collect();

        self.check_unique(&key, &inserted)?;
        self.check_references(&key, &inserted, "INSERT")?;

        let table = self.lookup(&key)?;
        let rows: Vec<Vec<Value>> = inserted.iter().map(|&i| table.rows[i].clone()).collect();
        Ok(ExecResult {
            rows: Self::output_rows(table, &insert.output, &rows)?,
            rows_affected: inserted.len() as u64,
        })
    }

    fn update(&mut self, update: &Update, params: &Params) -> DbResult<ExecResult> {
        let key = object_key(update.schema.as_deref(), &update.table);
        let table = self.lookup(&key)?;
        let targets = self.matching(table, update.where_clause.as_ref(), params)?;

        let mut assignments = Vec::with_capacity(update.assignments.len());
        for (name, expr) in &update.assignments {
            let p = table.column_index(name).ok_or_else(|| invalid_column(name))?;
            if table.columns[p].identity.is_some() {
                return Err(DbError::native(
                    8102,
                    format!("Cannot update identity column '{}'.", table.columns[p].name),
                ));
            }
            assignments.push((p, expr));
        }

        let mut changes = Vec::with_capacity(targets.len());
        for &r in &targets {
            let old = &table.rows[r];
            let s = Scope::new(params).with(Source {
                name: &table.name,
                table,
                row: Some(old),
            });
            let mut new = old.clone();
            for (p, expr) in &assignments {
                new[*p] = table.columns[*p].store(&table.name, &s.eval(expr)?)?;
            }
            changes.push((r, old.clone(), new));
        }

        let table = self.lookup_mut(&key)?;
        for (r, _, new) in &changes {
            table.rows[*r] = new.clone();
        }
        self.check_unique(&key, &targets)?;
        self.check_references(&key, &targets, "UPDATE")?;
        let pairs: Vec<(Vec<Value>, Vec<Value>)> =
            changes.into_iter().map(|(_, old, new)| (old, new)).collect();
        self.cascade_update(&key, &pairs)?;

        let table = self.lookup(&key)?;
        let rows: Vec<Vec<Value>> = pairs.into_iter().map(|(_, new)| new).collect();
        Ok(ExecResult {
            rows: Self::output_rows(table, &update.output, &rows)?,
            rows_affected: rows.len() as u64,
        })
    }

    fn delete(&mut self, delete: &Delete, params: &Params) -> DbResult<ExecResult> {
        let key = object_key(delete.schema.as_deref(), &delete.table);
        let table = self.lookup(&key)?;
        let targets = self.matching(table, delete.where_clause.as_ref(), params)?;
        let removed = self.delete_rows(&key, targets)?;
        let table = self.lookup(&key)?;
        Ok(ExecResult {
            rows: Self::output_rows(table, &delete.output, &removed)?,
            rows_affected: removed.len() as u64,
        })
    }

    /// Remove rows and apply the referential actions of foreign keys
    /// pointing at them.
    fn delete_rows(&mut self, key: &ObjectKey, mut positions: Vec<usize>) -> DbResult<Vec<Vec<Value>>> {
        positions.sort_unstable();
        positions.dedup();
        let table = self.lookup_mut(key)?;
        let mut removed: Vec<Vec<Value>> = positions
            .iter()
            .rev()
            .map(|&p| table.rows.remove(p))
            .collect();
        removed.reverse();

        for (child_key, fk) in self.referencing(key) {
            let parent = self.lookup(key)?;
            let parent_columns = columns_of(parent, &fk.descriptor.referenced_columns)?;
            let child = self.lookup(&child_key)?;
            let child_columns = columns_of(child, &fk.descriptor.columns)?;
            let mut victims = Vec::new();
            for row in &removed {
                let k = key_of(row, &parent_columns);
                if k.iter().any(Value::is_null) {
                    continue;
                }
                victims.extend(child.rows_matching(&child_columns, &k));
            }
            if victims.is_empty() {
                continue;
            }
            if !fk.descriptor.cascade_delete {
                return Err(reference_conflict("DELETE", &fk.descriptor, child));
            }
            self.delete_rows(&child_key, victims)?;
        }
        Ok(removed)
    }

    /// Propagate key changes to referencing rows.
    fn cascade_update(&mut self, key: &ObjectKey, pairs: &[(Vec<Value>, Vec<Value>)]) -> DbResult<()> {
        for (child_key, fk) in self.referencing(key) {
            let parent = self.lookup(key)?;
            let parent_columns = columns_of(parent, &fk.descriptor.referenced_columns)?;
            let child = self.lookup(&child_key)?;
            let child_columns = columns_of(child, &fk.descriptor.columns)?;

            let mut moved: Vec<(usize, Vec<Value>)> = Vec::new();
            for (old, new) in pairs {
                let old_key = key_of(old, &parent_columns);
                if old_key.iter().any(Value::is_null) || same_key(old, new, &parent_columns) {
                    continue;
                }
                let new_key = key_of(new, &parent_columns);
                for p in child.rows_matching(&child_columns, &old_key) {
                    moved.push((p, new_key.clone()));
                }
            }
            if moved.is_empty() {
                continue;
            }
            if !fk.descriptor.cascade_update {
                return Err(reference_conflict("UPDATE", &fk.descriptor, child));
            }

            let child = self.lookup_mut(&child_key)?;
            let mut child_pairs = Vec::with_capacity(moved.len());
            for (p, new_key) in moved {
                let old = child.rows[p].clone();
                for (&c, v) in child_columns.iter().zip(new_key) {
                    child.rows[p][c] = v;
                }
                child_pairs.push((old, child.rows[p].clone()));
            }
            self.cascade_update(&child_key, &child_pairs)?;
        }
        Ok(())
    }

    fn check_unique(&self, key: &ObjectKey, changed: &[usize]) -> DbResult<()> {
        let table = self.lookup(key)?;
        for index in table.indexes.iter().filter(|i| i.kind != IndexKind::NonUnique) {
            let columns = columns_of(table, &index.columns)?;
            for &r in changed {
                let duplicate = table
                    .rows
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != r && same_key(&table.rows[r], other, &columns));
                if !duplicate {
                    continue;
                }
                let value = format_key(&key_of(&table.rows[r], &columns));
                return Err(match index.kind {
                    IndexKind::PrimaryKey => DbError::native(
                        ERR_UNIQUE_CONSTRAINT,
                        format!(
                            "Violation of PRIMARY KEY constraint '{}'. Cannot insert duplicate key in object '{}'. The duplicate key value is ({}).",
                            index.name,
                            table.qualified_name(),
                            value
                        ),
                    ),
                    _ => DbError::native(
                        ERR_UNIQUE_INDEX,
                        format!(
                            "Cannot insert duplicate key row in object '{}' with unique index '{}'. The duplicate key value is ({}).",
                            table.qualified_name(),
                            index.name,
                            value
                        ),
                    ),
                });
            }
        }
        Ok(())
    }

    /// Every foreign key of the changed rows must find its referenced row.
    fn check_references(&self, key: &ObjectKey, changed: &[usize], verb: &str) -> DbResult<()> {
        let table = self.lookup(key)?;
        for fk in &table.foreign_keys {
            let columns = columns_of(table, &fk.descriptor.columns)?;
            let parent = self.lookup(&object_key(
                Some(&fk.referenced_schema),
                &fk.descriptor.referenced_table,
            ))?;
            let parent_columns = columns_of(parent, &fk.descriptor.referenced_columns)?;
            for &r in changed {
                let k = key_of(&table.rows[r], &columns);
                if k.iter().any(Value::is_null) {
                    continue;
                }
                if parent.rows_matching(&parent_columns, &k).is_empty() {
                    return Err(DbError::native(
                        ERR_FOREIGN_KEY,
                        format!(
                            "The {} statement conflicted with the FOREIGN KEY constraint \"{}\". The conflict occurred in table \"{}\", column '{}'.",
                            verb,
                            fk.descriptor.name,
                            parent.qualified_name(),
                            fk.descriptor.referenced_columns.join(", ")
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // DDL
    // ------------------------------------------------------------------

    fn ddl(&mut self, ddl: &DdlStatement) -> DbResult<()> {
        match ddl {
            DdlStatement::CreateTable(c) => self.create_table(c),
            DdlStatement::AlterTable(a) => self.alter_table(a),
            DdlStatement::DropTable(d) => self.drop_table(d),
            DdlStatement::CreateIndex(c) => self.create_index(c),
            DdlStatement::DropIndex(d) => self.drop_index(d),
            DdlStatement::CreateTableType(t) => self.create_type(t),
            DdlStatement::DropType(t) => self.drop_type(t),
            DdlStatement::CreateProcedure(p) => self.create_procedure(p),
            DdlStatement::DropProcedure(p) => self.drop_procedure(p),
        }
    }

    fn object_taken(&self, key: &ObjectKey) -> bool {
        self.tables.contains_key(key)
            || self.types.contains_key(key)
            || self.procedures.contains_key(key)
    }

    /// Whether a constraint of that name exists anywhere.
    fn constraint_taken(&self, name: &str) -> bool {
        self.tables.values().any(|t| {
            t.indexes
                .iter()
                .any(|i| i.kind == IndexKind::PrimaryKey && i.name.eq_ignore_ascii_case(name))
                || t.foreign_keys
                    .iter()
                    .any(|fk| fk.descriptor.name.eq_ignore_ascii_case(name))
                || t.columns.iter().any(|c| {
                    c.default
                        .as_ref()
                        .is_some_and(|(n, _)| n.eq_ignore_ascii_case(name))
                })
        })
    }

    fn column(&self, def: &ColumnDef) -> DbResult<MemColumn> {
        let mut column = MemColumn::from(def);
        if let Some(default) = &def.default {
            if self.constraint_taken(&default.name) {
                return Err(object_exists(&default.name));
            }
            let params = Params::new();
            let value = Scope::new(&params).eval(&default.value)?;
            let value = value.coerce_to(&column.column_type).ok_or_else(|| {
                DbError::native(
                    ERR_CONVERSION,
                    format!("Conversion failed for the default of column '{}'.", def.name),
                )
            })?;
            column.default = Some((default.name.clone(), value));
        }
        Ok(column)
    }

    fn create_table(&mut self, create: &CreateTable) -> DbResult<()> {
        let schema = create.schema.as_deref();
        let key = object_key(schema, &create.name);
        if self.object_taken(&key) {
            return Err(object_exists(&create.name));
        }
        let mut columns: Vec<MemColumn> = Vec::with_capacity(create.columns.len());
        for def in &create.columns {
            if columns.iter().any(|c| c.name.eq_ignore_ascii_case(&def.name)) {
                return Err(duplicate_column(&def.name, &create.name));
            }
            columns.push(self.column(def)?);
        }
        self.tables.insert(
            key.clone(),
            MemTable::new(schema.unwrap_or(DEFAULT_SCHEMA), &create.name, columns),
        );
        for constraint in &create.constraints {
            self.add_constraint(&key, constraint)?;
        }
        Ok(())
    }

    fn alter_table(&mut self, alter: &AlterTable) -> DbResult<()> {
        let key = object_key(alter.schema.as_deref(), &alter.name);
        self.lookup(&key)?;
        match &alter.action {
            AlterAction::AddColumn(def) => self.add_column(&key, def),
            AlterAction::DropColumn { name } => self.drop_column(&key, name),
            AlterAction::AlterColumn(def) => self.alter_column(&key, def),
            AlterAction::AddConstraint(c) => self.add_constraint(&key, c),
            AlterAction::DropConstraint { name } => self.drop_constraint(&key, name),
        }
    }

    fn add_column(&mut self, key: &ObjectKey, def: &ColumnDef) -> DbResult<()> {
        let column = self.column(def)?;
        let table = self.lookup_mut(key)?;
        if table.column_index(&def.name).is_some() {
            return Err(duplicate_column(&def.name, &table.name));
        }
        if !column.nullable
            && column.identity.is_none()
            && column.default.is_none()
            && !table.rows.is_empty()
        {
            return Err(DbError::native(
                4901,
                format!(
                    "ALTER TABLE only allows columns to be added that can contain nulls, or have a DEFAULT definition specified. Column '{}' cannot be added to non-empty table '{}' because it does not satisfy these conditions.",
                    def.name, table.name
                ),
            ));
        }
        let fill = match (&column.default, column.nullable) {
            (Some((_, v)), false) => v.clone(),
            _ => Value::Null,
        };
        let identity = column.identity.is_some();
        table.columns.push(column);
        let last = table.columns.len() - 1;
        for i in 0..table.rows.len() {
            let value = if identity {
                table.next_identity().map(Value::Int64).unwrap_or_default()
            } else {
                fill.clone()
            };
            let stored = table.columns[last].store(&table.name, &value)?;
            table.rows[i].push(stored);
        }
        Ok(())
    }

    fn drop_column(&mut self, key: &ObjectKey, name: &str) -> DbResult<()> {
        let table = self.lookup(key)?;
        let position = table
            .column_index(name)
            .ok_or_else(|| missing_column("DROP COLUMN", name, &table.name))?;
        let referenced_by = self
            .referencing(key)
            .into_iter()
            .find(|(_, fk)| fk.descriptor.referenced_columns.iter().any(|c| c.eq_ignore_ascii_case(name)))
            .map(|(_, fk)| fk.descriptor.name);
        if let Some(dependent) = table
            .dependent_constraint(name)
            .map(str::to_string)
            .or(referenced_by)
        {
            return Err(dependent_object(&dependent, "DROP COLUMN", name));
        }
        let table = self.lookup_mut(key)?;
        table.columns.remove(position);
        for row in &mut table.rows {
            row.remove(position);
        }
        Ok(())
    }

    fn alter_column(&mut self, key: &ObjectKey, def: &ColumnDef) -> DbResult<()> {
        let table = self.lookup(key)?;
        let position = table
            .column_index(&def.name)
            .ok_or_else(|| missing_column("ALTER COLUMN", &def.name, &table.name))?;
        let dependent = table
            .indexes
            .iter()
            .find(|i| i.touches(&def.name))
            .map(|i| i.name.clone())
            .or_else(|| {
                table
                    .foreign_keys
                    .iter()
                    .find(|fk| fk.descriptor.touches(&def.name))
                    .map(|fk| fk.descriptor.name.clone())
            });
        if let Some(dependent) = dependent {
            return Err(dependent_object(&dependent, "ALTER COLUMN", &def.name));
        }

        let previous = &table.columns[position];
        let mut column = MemColumn::from(def);
        column.identity = previous.identity;
        column.default = previous.default.clone();
        let values = table
            .rows
            .iter()
            .map(|row| column.store(&table.name, &row[position]))
            .collect::<DbResult<Vec<_>>>()?;

        let table = self.lookup_mut(key)?;
        table.columns[position] = column;
        for (row, value) in table.rows.iter_mut().zip(values) {
            row[position] = value;
        }
        Ok(())
    }

    fn add_constraint(&mut self, key: &ObjectKey, constraint: &TableConstraint) -> DbResult<()> {
        if self.constraint_taken(constraint.name()) {
            return Err(object_exists(constraint.name()));
        }
        match constraint {
            TableConstraint::PrimaryKey { name, columns } => {
                let table = self.lookup(key)?;
                if table.primary_key().is_some() {
                    return Err(DbError::native(
                        1779,
                        format!("Table '{}' already has a primary key defined on it.", table.name),
                    ));
                }
                let positions = columns_of(table, columns)?;
                if positions.iter().any(|&p| table.columns[p].nullable) {
                    return Err(DbError::native(
                        8111,
                        format!(
                            "Cannot define PRIMARY KEY constraint on nullable column in table '{}'.",
                            table.name
                        ),
                    ));
                }
                if let Some((first, _)) = table.find_duplicate(&positions) {
                    return Err(duplicate_on_create(table, name, &key_of(&table.rows[first], &positions)));
                }
                self.lookup_mut(key)?.indexes.push(IndexDescriptor::new(
                    name.clone(),
                    columns.clone(),
                    IndexKind::PrimaryKey,
                ));
            }
            TableConstraint::ForeignKey {
                name,
                columns,
                references_schema,
                references_table,
                references_columns,
                on_delete,
                on_update,
            } => {
                let table = self.lookup(key)?;
                columns_of(table, columns)?;
                let parent_key = object_key(references_schema.as_deref(), references_table);
                let parent = self.tables.get(&parent_key).ok_or_else(|| {
                    DbError::native(
                        1767,
                        format!("Foreign key '{}' references invalid table '{}'.", name, references_table),
                    )
                })?;
                if !parent.is_candidate_key(references_columns) {
                    return Err(DbError::native(
                        1776,
                        format!(
                            "There are no primary or candidate keys in the referenced table '{}' that match the referencing column list in the foreign key '{}'.",
                            parent.qualified_name(),
                            name
                        ),
                    ));
                }
                let foreign_key = MemForeignKey {
                    descriptor: ForeignKeyDescriptor {
                        name: name.clone(),
                        columns: columns.clone(),
                        referenced_table: parent.name.clone(),
                        referenced_columns: references_columns.clone(),
                        cascade_delete: *on_delete == ReferentialAction::Cascade,
                        cascade_update: *on_update == ReferentialAction::Cascade,
                    },
                    referenced_schema: parent.schema.clone(),
                };
                let table = self.lookup_mut(key)?;
                table.foreign_keys.push(foreign_key);
                let all: Vec<usize> = (0..table.rows.len()).collect();
                self.check_references(key, &all, "ALTER TABLE")?;
            }
        }
        Ok(())
    }

    fn drop_constraint(&mut self, key: &ObjectKey, name: &str) -> DbResult<()> {
        let referencing = self.referencing(key);
        let table = self.lookup_mut(key)?;
        if let Some(p) = table
            .indexes
            .iter()
            .position(|i| i.kind == IndexKind::PrimaryKey && i.name.eq_ignore_ascii_case(name))
        {
            let pk = &table.indexes[p];
            if let Some((child, fk)) = referencing
                .iter()
                .find(|(_, fk)| fk.descriptor.referenced_columns.iter().any(|c| pk.touches(c)))
            {
                return Err(DbError::native(
                    3725,
                    format!(
                        "The constraint '{}' is being referenced by table '{}', foreign key constraint '{}'.",
                        name, child.1, fk.descriptor.name
                    ),
                ));
            }
            table.indexes.remove(p);
            return Ok(());
        }
        if let Some(p) = table
            .foreign_keys
            .iter()
            .position(|fk| fk.descriptor.name.eq_ignore_ascii_case(name))
        {
            table.foreign_keys.remove(p);
            return Ok(());
        }
        if let Some(column) = table.columns.iter_mut().find(|c| {
            c.default
                .as_ref()
                .is_some_and(|(n, _)| n.eq_ignore_ascii_case(name))
        }) {
            column.default = None;
            return Ok(());
        }
        Err(DbError::native(
            3728,
            format!("'{}' is not a constraint. Could not drop constraint.", name),
        ))
    }

    fn drop_table(&mut self, drop: &DropTable) -> DbResult<()> {
        let key = object_key(drop.schema.as_deref(), &drop.name);
        if !self.tables.contains_key(&key) {
            return missing_object(drop.if_exists, "table", &drop.name);
        }
        if self.referencing(&key).iter().any(|(child, _)| *child != key) {
            return Err(DbError::native(
                3726,
                format!(
                    "Could not drop object '{}' because it is referenced by a FOREIGN KEY constraint.",
                    display_name(drop.schema.as_deref(), &drop.name)
                ),
            ));
        }
        self.tables.remove(&key);
        Ok(())
    }

    fn create_index(&mut self, create: &CreateIndex) -> DbResult<()> {
        let key = object_key(create.schema.as_deref(), &create.table);
        let table = self.lookup(&key)?;
        if table.indexes.iter().any(|i| i.name.eq_ignore_ascii_case(&create.name)) {
            return Err(DbError::native(
                1913,
                format!(
                    "The operation failed because an index or statistics with name '{}' already exists on table '{}'.",
                    create.name,
                    table.qualified_name()
                ),
            ));
        }
        let positions = columns_of(table, &create.columns)?;
        if create.unique {
            if let Some((first, _)) = table.find_duplicate(&positions) {
                return Err(duplicate_on_create(table, &create.name, &key_of(&table.rows[first], &positions)));
            }
        }
        let kind = if create.unique {
            IndexKind::UniqueKey
        } else {
            IndexKind::NonUnique
        };
        self.lookup_mut(&key)?.indexes.push(IndexDescriptor::new(
            create.name.clone(),
            create.columns.clone(),
            kind,
        ));
        Ok(())
    }

    fn drop_index(&mut self, drop: &DropIndex) -> DbResult<()> {
        let key = object_key(drop.schema.as_deref(), &drop.table);
        let index_name = format!("{}.{}", drop.table, drop.name);
        let Some(table) = self.tables.get(&key) else {
            return missing_object(drop.if_exists, "index", &index_name);
        };
        let Some(p) = table
            .indexes
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(&drop.name))
        else {
            return missing_object(drop.if_exists, "index", &index_name);
        };
        let index = &table.indexes[p];
        let enforcing = if index.kind == IndexKind::PrimaryKey {
            Some("PRIMARY KEY")
        } else if self
            .referencing(&key)
            .iter()
            .any(|(_, fk)| same_columns(&fk.descriptor.referenced_columns, &index.columns))
        {
            Some("FOREIGN KEY")
        } else {
            None
        };
        if let Some(what) = enforcing {
            return Err(DbError::native(
                3723,
                format!(
                    "An explicit DROP INDEX is not allowed on index '{}'. It is being used for {} constraint enforcement.",
                    index_name, what
                ),
            ));
        }
        self.lookup_mut(&key)?.indexes.remove(p);
        Ok(())
    }

    fn create_type(&mut self, create: &CreateTableType) -> DbResult<()> {
        let key = object_key(create.schema.as_deref(), &create.name);
        if self.object_taken(&key) {
            return Err(object_exists(&create.name));
        }
        self.types.insert(key, create.clone());
        Ok(())
    }

    fn drop_type(&mut self, drop: &DropType) -> DbResult<()> {
        let key = object_key(drop.schema.as_deref(), &drop.name);
        if !self.types.contains_key(&key) {
            if drop.if_exists {
                return Ok(());
            }
            return Err(DbError::native(
                218,
                format!(
                    "Cannot find the type '{}', because it does not exist or you do not have permission.",
                    drop.name
                ),
            ));
        }
        if let Some(user) = self.procedures.values().find(|p| {
            p.params.iter().any(|param| match &param.kind {
                ParamKind::Table { schema, type_name } => {
                    object_key(schema.as_deref(), type_name) == key
                }
                ParamKind::Scalar(_) => false,
            })
        }) {
            return Err(DbError::native(
                3732,
                format!(
                    "Cannot drop type '{}' because it is being referenced by object '{}'.",
                    drop.name, user.name
                ),
            ));
        }
        self.types.remove(&key);
        Ok(())
    }

    fn create_procedure(&mut self, create: &CreateProcedure) -> DbResult<()> {
        let key = object_key(create.schema.as_deref(), &create.name);
        if self.object_taken(&key) {
            return Err(object_exists(&create.name));
        }
        for (n, param) in create.params.iter().enumerate() {
            if let ParamKind::Table { schema, type_name } = &param.kind {
                if !self.types.contains_key(&object_key(schema.as_deref(), type_name)) {
                    return Err(DbError::native(
                        2715,
                        format!(
                            "Column, parameter, or variable #{}: Cannot find data type {}.",
                            n + 1,
                            type_name
                        ),
                    ));
                }
            }
        }
        self.procedures.insert(key, create.clone());
        Ok(())
    }

    fn drop_procedure(&mut self, drop: &DropProcedure) -> DbResult<()> {
        let key = object_key(drop.schema.as_deref(), &drop.name);
        if self.procedures.remove(&key).is_none() {
            return missing_object(drop.if_exists, "procedure", &drop.name);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    fn catalog(&self, query: &CatalogQuery) -> Vec<Row> {
        let pairs = |items: Vec<(&str, Value)>| {
            Row::from_pairs(items.into_iter().map(|(k, v)| (k.to_string(), v)))
        };
        match query {
            CatalogQuery::Columns { schema, table } => self
                .table(schema, table)
                .map(|t| {
                    t.columns
                        .iter()
                        .map(|c| {
                            let (type_name, max_length, precision, scale) =
                                c.column_type.to_catalog();
                            pairs(vec![
                                ("column_name", Value::from(c.name.as_str())),
                                ("type_name", Value::from(type_name)),
                                ("max_length", Value::Int32(max_length)),
                                ("precision", Value::Int32(precision as i32)),
                                ("scale", Value::Int32(scale as i32)),
                                ("is_nullable", Value::Bool(c.nullable)),
                                ("is_identity", Value::Bool(c.identity.is_some())),
                                ("identity_seed", c.identity.map(|(s, _)| s).into()),
                                ("identity_increment", c.identity.map(|(_, i)| i).into()),
                            ])
                        })
                        .collect()
                })
                .unwrap_or_default(),
            CatalogQuery::Indexes { schema, table } => {
                let Some(t) = self.table(schema, table) else {
                    return vec![];
                };
                let mut indexes: Vec<&IndexDescriptor> = t.indexes.iter().collect();
                indexes.sort_by_key(|i| i.name.to_lowercase());
                indexes
                    .into_iter()
                    .flat_map(|i| {
                        i.columns.iter().enumerate().map(move |(n, c)| {
                            pairs(vec![
                                ("index_name", Value::from(i.name.as_str())),
                                ("is_primary_key", Value::Bool(i.kind == IndexKind::PrimaryKey)),
                                ("is_unique", Value::Bool(i.kind != IndexKind::NonUnique)),
                                ("column_name", Value::from(c.as_str())),
                                ("key_ordinal", Value::Int32(n as i32 + 1)),
                            ])
                        })
                    })
                    .collect()
            }
            CatalogQuery::ForeignKeys { schema, table } => {
                let Some(t) = self.table(schema, table) else {
                    return vec![];
                };
                let mut fks: Vec<&ForeignKeyDescriptor> =
                    t.foreign_keys.iter().map(|fk| &fk.descriptor).collect();
                fks.sort_by_key(|fk| fk.name.to_lowercase());
                let action = |cascade: bool| Value::from(if cascade { "CASCADE" } else { "NO_ACTION" });
                fks.into_iter()
                    .flat_map(|fk| {
                        fk.columns.iter().zip(&fk.referenced_columns).map(move |(c, r)| {
                            pairs(vec![
                                ("fk_name", Value::from(fk.name.as_str())),
                                ("column_name", Value::from(c.as_str())),
                                ("referenced_table", Value::from(fk.referenced_table.as_str())),
                                ("referenced_column", Value::from(r.as_str())),
                                ("delete_action", action(fk.cascade_delete)),
                                ("update_action", action(fk.cascade_update)),
                            ])
                        })
                    })
                    .collect()
            }
            CatalogQuery::ObjectExists { schema, name, kind } => {
                let key = object_key(Some(schema), name);
                let present = match kind {
                    ObjectKind::Table => self.tables.contains_key(&key),
                    ObjectKind::Procedure => self.procedures.contains_key(&key),
                    ObjectKind::TableType => self.types.contains_key(&key),
                };
                if present {
                    vec![pairs(vec![("present", Value::Int32(1))])]
                } else {
                    vec![]
                }
            }
        }
    }
}

fn scope<'a>(
    sources: &'a [(&'a str, &'a MemTable)],
    combo: &[Option<usize>],
    params: &'a Params,
) -> Scope<'a> {
    let mut s = Scope::new(params);
    for ((name, table), row) in sources.iter().zip(combo) {
        s = s.with(Source {
            name,
            table,
            row: row.map(|i| table.rows[i].as_slice()),
        });
    }
    s
}

fn duplicate_column(column: &str, table: &str) -> DbError {
    DbError::native(
        2705,
        format!(
            "Column names in each table must be unique. Column name '{}' in table '{}' is specified more than once.",
            column, table
        ),
    )
}

fn missing_column(action: &str, column: &str, table: &str) -> DbError {
    DbError::native(
        4924,
        format!(
            "ALTER TABLE {} failed because column '{}' does not exist in table '{}'.",
            action, column, table
        ),
    )
}

fn dependent_object(dependent: &str, action: &str, column: &str) -> DbError {
    DbError::native(
        5074,
        format!(
            "The object '{}' is dependent on column '{}'. ALTER TABLE {} {} failed because one or more objects access this column.",
            dependent, column, action, column
        ),
    )
}

fn duplicate_on_create(table: &MemTable, index: &str, key: &[Value]) -> DbError {
    DbError::native(
        1505,
        format!(
            "The CREATE UNIQUE INDEX statement terminated because a duplicate key was found for the object name '{}' and the index name '{}'. The duplicate key value is ({}).",
            table.qualified_name(),
            index,
            format_key(key)
        ),
    )
}

fn missing_object(if_exists: bool, what: &str, name: &str) -> DbResult<()> {
    if if_exists {
        return Ok(());
    }
    Err(DbError::native(
        3701,
        format!(
            "Cannot drop the {} '{}', because it does not exist or you do not have permission.",
            what, name
        ),
    ))
}
