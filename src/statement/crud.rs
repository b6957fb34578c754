//! Row statements for one table.
//!
//! Parameters are named after their columns (`@Code`). Update filters bind
//! the key the row had when it was read as `@Original_{column}`, so the
//! key itself can change. The site column is always bound as `@__Site`.

use super::KeyKind;
use crate::error::{ConfigError, Result};
use crate::mapper::dehydrate::column_value;
use crate::mapper::record::Record;
use crate::mapper::row::{param_name, Params};
use crate::mapper::value::Value;
use crate::schema::model::{ColumnDescriptor, ColumnRole, TableSchema, PARENT_COLUMN, ROW_ID_COLUMN};
use crate::sql::dml::{Delete, Insert, Update};
use crate::sql::expr::{and_all, col, never, param, table_col, Expr, ExprExt};
use crate::sql::query::{OrderByExpr, Query, SelectExpr, TableRef};

/// Prefix of update-filter parameters holding the key as read.
pub const ORIGINAL_PREFIX: &str = "Original_";

/// Values the record does not carry.
#[derive(Debug, Clone, Default)]
pub struct Synthetic<'a> {
    pub site: Option<&'a str>,
    /// `(table, type name, module)` written to the descriptor columns.
    pub descriptor: Option<(&'a str, &'a str, &'a str)>,
    /// Link value of a subtable row.
    pub parent: Option<Value>,
}

impl<'a> Synthetic<'a> {
    pub fn site(site: Option<&'a str>) -> Self {
        Self {
            site,
            ..Default::default()
        }
    }

    pub fn parent(parent: Value) -> Self {
        Self {
            parent: Some(parent),
            ..Default::default()
        }
    }

    fn value(&self, column: &ColumnDescriptor) -> Option<Value> {
        let text = |s: Option<&str>| s.map(Value::from).unwrap_or(Value::Null);
        match column.role {
            ColumnRole::Site => Some(text(self.site)),
            ColumnRole::DerivedTable => Some(text(self.descriptor.map(|d| d.0))),
            ColumnRole::DerivedType => Some(text(self.descriptor.map(|d| d.1))),
            ColumnRole::DerivedModule => Some(text(self.descriptor.map(|d| d.2))),
            ColumnRole::Parent => Some(self.parent.clone().unwrap_or(Value::Null)),
            _ => None,
        }
    }
}

fn column_ref(alias: Option<&str>, name: &str) -> Expr {
    match alias {
        Some(a) => table_col(a, name),
        None => col(name),
    }
}

fn table_ref(table: &TableSchema) -> TableRef {
    TableRef::new(&table.name).with_schema(&table.schema)
}

/// Every stored column plus computed expressions, in table order.
pub fn select_list(table: &TableSchema, alias: Option<&str>) -> Vec<SelectExpr> {
    let mut list: Vec<SelectExpr> = table
        .columns
        .iter()
        .map(|c| SelectExpr::new(column_ref(alias, &c.name)))
        .collect();
    list.extend(
        table
            .computed
            .iter()
            .map(|c| SelectExpr::new(c.expr()).with_alias(&c.name)),
    );
    list
}

/// Columns addressing one row.
pub fn address_columns(table: &TableSchema, kind: KeyKind) -> Result<Vec<&ColumnDescriptor>> {
    match kind {
        KeyKind::Key => Ok(table.key_columns()),
        KeyKind::Identity => {
            let identity = table.identity().ok_or_else(|| {
                ConfigError::invalid_identity(&table.type_key, &table.name, "type has no identity")
            })?;
            let mut cols = vec![identity];
            cols.extend(table.columns.iter().filter(|c| c.role == ColumnRole::Site));
            Ok(cols)
        }
    }
}

/// `col = @{prefix}col AND ...`; the site column never takes the prefix.
pub(super) fn address_filter(columns: &[&ColumnDescriptor], alias: Option<&str>, prefix: &str) -> Expr {
    and_all(columns.iter().map(|c| {
        let name = match c.role {
            ColumnRole::Site => param_name(&c.name),
            _ => format!("{}{}", prefix, param_name(&c.name)),
        };
        column_ref(alias, &c.name).eq(param(&name))
    }))
    .unwrap_or_else(never)
}

/// SELECT TOP (1) of one row by key or identity.
pub fn get(table: &TableSchema, kind: KeyKind) -> Result<Query> {
    let address = address_columns(table, kind)?;
    Ok(Query::new()
        .top(1)
        .select(select_list(table, None))
        .from(table_ref(table))
        .filter(address_filter(&address, None, "")))
}

/// INSERT of every insertable column, returning the identity when there is one.
pub fn insert(table: &TableSchema) -> Insert {
    let columns = table.insert_columns();
    let mut insert = Insert::into(&table.name)
        .schema(&table.schema)
        .columns(columns.iter().map(|c| c.name.clone()))
        .values(columns.iter().map(|c| param(&param_name(&c.name))));
    if let Some(identity) = table.identity() {
        insert = insert.output([identity.name.clone()]);
    }
    insert
}

/// Columns an UPDATE writes: everything insertable except the columns that
/// place the row (site and parent link) and the descriptor, which is fixed
/// when the row is added.
fn update_columns(table: &TableSchema) -> Vec<&ColumnDescriptor> {
    table
        .insert_columns()
        .into_iter()
        .filter(|c| {
            !matches!(
                c.role,
                ColumnRole::Site
                    | ColumnRole::Parent
                    | ColumnRole::DerivedTable
                    | ColumnRole::DerivedType
                    | ColumnRole::DerivedModule
            )
        })
        .collect()
}

/// UPDATE addressed by the key as read (`@Original_*`).
pub fn update(table: &TableSchema, kind: KeyKind) -> Result<Update> {
    let address = address_columns(table, kind)?;
    let mut update = Update::table(&table.name).schema(&table.schema);
    for c in update_columns(table) {
        update = update.set(c.name.clone(), param(&param_name(&c.name)));
    }
    Ok(update.filter(address_filter(&address, None, ORIGINAL_PREFIX)))
}

/// UPDATE of a derived table's own columns, addressed by the current key.
/// `None` when the derived table holds nothing but its key.
pub fn update_derived(table: &TableSchema) -> Option<Update> {
    let key = table.key_columns();
    let own: Vec<&ColumnDescriptor> = update_columns(table)
        .into_iter()
        .filter(|c| !key.iter().any(|k| k.name == c.name))
        .collect();
    if own.is_empty() {
        return None;
    }
    let mut update = Update::table(&table.name).schema(&table.schema);
    for c in own {
        update = update.set(c.name.clone(), param(&param_name(&c.name)));
    }
    Some(update.filter(address_filter(&key, None, "")))
}

/// DELETE of one row by key or identity.
pub fn delete(table: &TableSchema, kind: KeyKind) -> Result<Delete> {
    let address = address_columns(table, kind)?;
    Ok(Delete::from(&table.name)
        .schema(&table.schema)
        .filter(address_filter(&address, None, "")))
}

/// INSERT of one subtable row, returning its row id.
pub fn insert_child(sub: &TableSchema) -> Insert {
    insert(sub)
}

/// DELETE of every subtable row of one parent.
pub fn delete_children(sub: &TableSchema) -> Delete {
    Delete::from(&sub.name)
        .schema(&sub.schema)
        .filter(col(PARENT_COLUMN).eq(param(&param_name(PARENT_COLUMN))))
}

/// Name of the n-th parent parameter of [`select_children`].
pub fn parent_param(n: usize) -> String {
    format!("{}{}", param_name(PARENT_COLUMN), n)
}

/// Subtable rows of `parents` parents, in insertion order.
pub fn select_children(sub: &TableSchema, parents: usize) -> Query {
    Query::new()
        .select(select_list(sub, None))
        .from(table_ref(sub))
        .filter(col(PARENT_COLUMN).in_list((0..parents).map(|i| param(&parent_param(i))).collect()))
        .order_by(vec![OrderByExpr::asc(col(ROW_ID_COLUMN))])
}

/// Bind the columns of an INSERT or UPDATE.
pub fn bind_row(table: &TableSchema, record: &Record, synthetic: &Synthetic<'_>, params: &mut Params) -> Result<()> {
    for c in table.insert_columns() {
        let value = match synthetic.value(c) {
            Some(v) => v,
            None => column_value(record, c)?,
        };
        params.bind(param_name(&c.name), value);
    }
    Ok(())
}

/// Bind the address of a row; `prefix` is [`ORIGINAL_PREFIX`] for UPDATE.
pub fn bind_address(
    table: &TableSchema,
    kind: KeyKind,
    record: &Record,
    site: Option<&str>,
    prefix: &str,
    params: &mut Params,
) -> Result<()> {
    let synthetic = Synthetic::site(site);
    for c in address_columns(table, kind)? {
        match synthetic.value(c) {
            Some(v) => {
                params.bind(param_name(&c.name), v);
            }
            None => {
                params.bind(format!("{}{}", prefix, param_name(&c.name)), column_value(record, c)?);
            }
        }
    }
    Ok(())
}

/// Bind the parent values of [`select_children`].
pub fn bind_parents(parents: &[Value], params: &mut Params) {
    for (i, value) in parents.iter().enumerate() {
        params.bind(parent_param(i), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::descriptor::ValueType;
    use crate::schema::model::{IndexDescriptor, IndexKind, SITE_COLUMN};
    use crate::sql::dialect::Dialect;
    use crate::sql::test_utils::validate_sql;
    use crate::sql::types::ColumnType;
    use insta::assert_snapshot;

    fn prop(name: &str, ty: ColumnType, vt: ValueType) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ty).role(ColumnRole::Property {
            path: vec![name.to_string()],
            value_type: vt,
        })
    }

    fn orders() -> TableSchema {
        let mut t = TableSchema::new("dbo", "Orders");
        t.type_key = "Shop.Order".into();
        t.site_scoped = true;
        t.columns = vec![
            prop("Id", ColumnType::Int32, ValueType::Int32).identity(),
            prop("Code", ColumnType::Text(Some(10)), ValueType::Text),
            prop("Total", ColumnType::Int32, ValueType::Int32).nullable(),
            ColumnDescriptor::new(SITE_COLUMN, ColumnType::Text(Some(100))).role(ColumnRole::Site),
        ];
        t.indexes = vec![
            IndexDescriptor::new("PK_Orders", vec!["Code".into(), SITE_COLUMN.into()], IndexKind::PrimaryKey),
            IndexDescriptor::new("UX_Orders_Id", vec!["Id".into()], IndexKind::UniqueKey),
        ];
        t
    }

    fn lines() -> TableSchema {
        let mut t = TableSchema::new("dbo", "Orders_Lines");
        t.columns = vec![
            ColumnDescriptor::new(ROW_ID_COLUMN, ColumnType::Int32).identity().role(ColumnRole::RowId),
            prop("Qty", ColumnType::Int32, ValueType::Int32),
            ColumnDescriptor::new(PARENT_COLUMN, ColumnType::Int32).role(ColumnRole::Parent),
        ];
        t.indexes = vec![IndexDescriptor::new("PK_Orders_Lines", vec![ROW_ID_COLUMN.into()], IndexKind::PrimaryKey)];
        t
    }

    #[test]
    fn test_get_by_key() {
        let sql = get(&orders(), KeyKind::Key).unwrap().to_sql(Dialect::TSql);
        assert_snapshot!(sql, @r"
        SELECT TOP (1)
            [Id],
            [Code],
            [Total],
            [__Site]
        FROM [dbo].[Orders]
        WHERE [Code] = @Code AND [__Site] = @__Site
        ");
        validate_sql(&sql, Dialect::TSql).unwrap();
    }

    #[test]
    fn test_get_by_identity_keeps_site() {
        let sql = get(&orders(), KeyKind::Identity).unwrap().to_sql(Dialect::TSql);
        assert!(sql.ends_with("WHERE [Id] = @Id AND [__Site] = @__Site"));
    }

    #[test]
    fn test_insert_outputs_identity() {
        assert_snapshot!(insert(&orders()).to_sql(Dialect::TSql), @r"
        INSERT INTO [dbo].[Orders] ([Code], [Total], [__Site])
        OUTPUT INSERTED.[Id]
        VALUES (@Code, @Total, @__Site)
        ");
    }

    #[test]
    fn test_update_uses_original_key() {
        assert_snapshot!(update(&orders(), KeyKind::Key).unwrap().to_sql(Dialect::TSql), @r"
        UPDATE [dbo].[Orders]
        SET [Code] = @Code, [Total] = @Total
        WHERE [Code] = @Original_Code AND [__Site] = @__Site
        ");
    }

    #[test]
    fn test_children_statements() {
        assert_eq!(
            delete_children(&lines()).to_sql(Dialect::TSql),
            "DELETE FROM [dbo].[Orders_Lines]\nWHERE [__Parent] = @__Parent"
        );
        let sql = select_children(&lines(), 2).to_sql(Dialect::TSql);
        assert!(sql.contains("WHERE [__Parent] IN (@__Parent0, @__Parent1)"));
        assert!(sql.ends_with("ORDER BY [__RowId] ASC"));
    }

    #[test]
    fn test_identity_required_for_identity_statements() {
        assert!(get(&lines(), KeyKind::Identity).is_ok());
        let mut t = orders();
        t.columns.remove(0);
        assert!(delete(&t, KeyKind::Identity).is_err());
    }

    #[test]
    fn test_bind_row_and_address() {
        let t = orders();
        let r = Record::new("Shop.Order").with("Code", "A1").with("Total", 5);
        let mut params = Params::new();
        bind_row(&t, &r, &Synthetic::site(Some("north")), &mut params).unwrap();
        bind_address(&t, KeyKind::Key, &r, Some("north"), ORIGINAL_PREFIX, &mut params).unwrap();
        assert_eq!(params.get("Code"), Some(&Value::from("A1")));
        assert_eq!(params.get("Original_Code"), Some(&Value::from("A1")));
        assert_eq!(params.get("__Site"), Some(&Value::from("north")));
        assert!(params.get("Id").is_none());
    }
}
