//! Filtered, sorted and paged reads with optional joins.
//!
//! The primary table is aliased `t0` and joined tables `t1`, `t2`, ... in
//! join order. Field names resolve through a [`ColumnMap`]: the primary
//! table's columns are claimed first, then each joined table's in join order,
//! and a name already claimed is never taken over. A joined column that
//! shares its name with an earlier table's column is therefore unreachable
//! by name.

use super::crud::select_list;
use super::filter::{Filter, FilterCompiler};
use crate::error::{ConfigError, Result};
use crate::mapper::row::{param_name, Params};
use crate::mapper::value::Value;
use crate::schema::model::{ColumnRole, TableSchema, SITE_COLUMN};
use crate::sql::expr::{and_all, count_star, param, table_col, Expr, ExprExt};
use crate::sql::query::{JoinType, OrderByExpr, Query, SelectExpr, SortDir, TableRef};
use crate::sql::types::ColumnType;

/// Alias of the primary table.
pub const PRIMARY_ALIAS: &str = "t0";
/// Alias of the base table when the primary table is a derived one.
pub const BASE_ALIAS: &str = "tb";
/// Output name of the count column.
pub const TOTAL_COLUMN: &str = "Total";

#[derive(Debug, Clone)]
struct MapEntry {
    name: String,
    expr: Expr,
    column_type: ColumnType,
}

/// Field name to qualified column, first claim wins.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    entries: Vec<MapEntry>,
}

impl ColumnMap {
    pub fn build(primary: &TableSchema, alias: &str, joins: &[(&TableSchema, &str)]) -> Self {
        let mut map = ColumnMap::default();
        map.claim(primary, alias);
        for (table, alias) in joins {
            map.claim(table, alias);
        }
        map
    }

    /// Add a table's columns that no earlier table claimed.
    pub fn claim(&mut self, table: &TableSchema, alias: &str) {
        for c in &table.columns {
            if self.position(&c.name).is_none() {
                self.entries.push(MapEntry {
                    name: c.name.clone(),
                    expr: table_col(alias, &c.name),
                    column_type: c.column_type,
                });
            }
        }
    }

    /// Column for a field; a nested property path `Home.City` resolves as
    /// its flattened column `Home_City`.
    pub fn resolve(&self, field: &str) -> Option<(&Expr, ColumnType)> {
        let index = self
            .position(field)
            .or_else(|| self.position(&field.replace('.', "_")))?;
        let entry = &self.entries[index];
        Some((&entry.expr, entry.column_type))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub dir: SortDir,
}

/// A join to another persisted type's table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub type_key: String,
    /// `(field of an earlier table, column of the joined table)` pairs.
    pub on: Vec<(String, String)>,
    pub kind: JoinType,
}

impl JoinSpec {
    pub fn inner(type_key: impl Into<String>, on: &[(&str, &str)]) -> Self {
        Self {
            type_key: type_key.into(),
            on: on.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect(),
            kind: JoinType::Inner,
        }
    }

    pub fn left(type_key: impl Into<String>, on: &[(&str, &str)]) -> Self {
        Self {
            kind: JoinType::Left,
            ..Self::inner(type_key, on)
        }
    }
}

/// What a paged query reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub filter: Option<Filter>,
    pub sort: Vec<Sort>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub joins: Vec<JoinSpec>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(Sort {
            field: field.into(),
            dir: SortDir::Asc,
        });
        self
    }

    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(Sort {
            field: field.into(),
            dir: SortDir::Desc,
        });
        self
    }

    pub fn page(mut self, skip: u64, take: u64) -> Self {
        self.skip = Some(skip);
        self.take = Some(take);
        self
    }

    pub fn join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }
}

/// The statements of a paged query, sharing one parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    pub page: Query,
    pub count: Query,
    pub params: Params,
    /// A zero-row page: only the count runs.
    pub empty_page: bool,
}

fn site_filter(table: &TableSchema, alias: &str) -> Option<Expr> {
    table
        .columns
        .iter()
        .any(|c| c.role == ColumnRole::Site)
        .then(|| table_col(alias, SITE_COLUMN).eq(param(&param_name(SITE_COLUMN))))
}

/// Plan a paged query.
///
/// `base` is the base table when `primary` is a derived table: it is joined
/// on the shared key and its columns are read too. `joined` holds the tables
/// of `spec.joins`, in order.
pub fn plan_select(
    primary: &TableSchema,
    base: Option<&TableSchema>,
    joined: &[&TableSchema],
    spec: &QuerySpec,
    site: Option<&str>,
) -> Result<SelectPlan> {
    let mut params = Params::new();
    let mut map = ColumnMap::default();
    map.claim(primary, PRIMARY_ALIAS);

    let from = TableRef::new(&primary.name)
        .with_schema(&primary.schema)
        .with_alias(PRIMARY_ALIAS);
    let mut select = select_list(primary, Some(PRIMARY_ALIAS));
    let mut page = Query::new().from(from.clone());
    let mut count = Query::new()
        .select(vec![SelectExpr::new(count_star()).with_alias(TOTAL_COLUMN)])
        .from(from);

    if let Some(base) = base {
        select.extend(
            base.columns
                .iter()
                .filter(|c| !primary.has_column(&c.name))
                .map(|c| SelectExpr::new(table_col(BASE_ALIAS, &c.name))),
        );
        let on = and_all(primary.key_columns().iter().map(|k| {
            table_col(BASE_ALIAS, &k.name).eq(table_col(PRIMARY_ALIAS, &k.name))
        }))
        .ok_or_else(|| ConfigError::MissingPrimaryKey {
            type_name: primary.type_key.clone(),
        })?;
        let table_ref = TableRef::new(&base.name)
            .with_schema(&base.schema)
            .with_alias(BASE_ALIAS);
        page = page.inner_join(table_ref.clone(), on.clone());
        count = count.inner_join(table_ref, on);
        map.claim(base, BASE_ALIAS);
    }
    page = page.select(select);

    for (i, (join, table)) in spec.joins.iter().zip(joined).enumerate() {
        let alias = format!("t{}", i + 1);
        let mut on = Vec::with_capacity(join.on.len() + 1);
        for (left, right) in &join.on {
            let (left, _) = map
                .resolve(left)
                .ok_or_else(|| ConfigError::unknown_field(&primary.type_key, left))?;
            let right = table
                .column(right)
                .ok_or_else(|| ConfigError::unknown_field(&table.type_key, right))?;
            on.push(table_col(&alias, &right.name).eq(left.clone()));
        }
        on.extend(site_filter(table, &alias));
        let on = and_all(on).ok_or_else(|| {
            ConfigError::InvalidDescriptor(format!("join to {} has no join columns", join.type_key))
        })?;
        let table_ref = TableRef::new(&table.name)
            .with_schema(&table.schema)
            .with_alias(&alias);
        page = page.join(join.kind, table_ref.clone(), on.clone());
        count = count.join(join.kind, table_ref, on);
        map.claim(table, &alias);
    }

    let mut predicates = Vec::new();
    if let Some(f) = &spec.filter {
        let mut compiler = FilterCompiler::new(&map, &primary.type_key, &mut params);
        predicates.extend(compiler.compile(f)?);
    }
    if let Some(site_predicate) = site_filter(primary, PRIMARY_ALIAS) {
        predicates.push(site_predicate);
        params.bind(param_name(SITE_COLUMN), site.map(Value::from).unwrap_or(Value::Null));
    }
    if let Some(predicate) = and_all(predicates) {
        page = page.filter(predicate.clone());
        count = count.filter(predicate);
    }

    let mut order = Vec::new();
    for sort in &spec.sort {
        let (expr, _) = map
            .resolve(&sort.field)
            .ok_or_else(|| ConfigError::unknown_field(&primary.type_key, &sort.field))?;
        order.push(OrderByExpr {
            expr: expr.clone(),
            dir: sort.dir,
        });
    }
    if order.is_empty() {
        order = primary
            .key_columns()
            .iter()
            .map(|c| OrderByExpr::asc(table_col(PRIMARY_ALIAS, &c.name)))
            .collect();
    }
    page = page.order_by(order);
    if let Some(skip) = spec.skip {
        page = page.offset(skip);
    }
    // FETCH NEXT 0 ROWS is rejected by SQL Server.
    if let Some(take) = spec.take.filter(|t| *t > 0) {
        page = page.offset(spec.skip.unwrap_or(0)).limit(take);
    }

    Ok(SelectPlan {
        page,
        count,
        params,
        empty_page: spec.take == Some(0),
    })
}
