//! Migration planning.
//!
//! A plan converges a group of tables (a type's table, its subtables and its
//! derived tables) on their desired shape. Statements are emitted in phases
//! across the whole group so that dependencies resolve in order:
//!
//! 1. drop foreign keys, then indexes, that changed, disappeared or sit on
//!    columns about to be dropped or altered
//! 2. drop removed columns
//! 3. create new tables and add new columns
//! 4. replace NULLs in columns becoming required, then alter columns
//! 5. create indexes (primary keys first), then drop migration defaults
//! 6. create foreign keys
//!
//! Tables are listed parents first, subtables depth-first, so every table a
//! foreign key references exists by phase 6.

use std::collections::HashSet;

use tracing::{debug, info};

use super::diff::TableDiff;
use crate::error::ConfigError;
use crate::mapper::value::Value;
use crate::provider::connection::Statement;
use crate::schema::builder::default_name;
use crate::schema::model::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, IndexKind, TableSchema,
};
use crate::sql::ddl::{AlterAction, AlterTable, DropTable};
use crate::sql::dml::Update;
use crate::sql::expr::{col, lit_int, Expr, ExprExt};
use crate::sql::query::{Query, TableRef};

/// A desired table with what is known about its live counterpart.
#[derive(Debug, Clone, Copy)]
pub struct TableState<'a> {
    pub desired: &'a TableSchema,
    pub live: Option<&'a TableSchema>,
    /// Whether the live table holds any rows.
    pub has_rows: bool,
}

impl<'a> TableState<'a> {
    pub fn new(desired: &'a TableSchema, live: Option<&'a TableSchema>, has_rows: bool) -> Self {
        Self {
            desired,
            live,
            has_rows,
        }
    }
}

/// Query returning one row when the table holds any.
pub fn probe_rows(schema: &str, table: &str) -> Query {
    Query::new()
        .top(1)
        .select(vec![lit_int(1)])
        .from(TableRef::new(table).with_schema(schema))
}

fn literal_default(column: &ColumnDescriptor) -> Option<Expr> {
    column.migration_default.as_ref().map(|d| {
        let value = Value::from(d);
        value
            .coerce_to(&column.column_type)
            .unwrap_or(value)
            .to_literal()
    })
}

#[derive(Default)]
struct Phases {
    drop_foreign_keys: Vec<Statement>,
    drop_indexes: Vec<Statement>,
    drop_columns: Vec<Statement>,
    add: Vec<Statement>,
    alter: Vec<Statement>,
    create_primary_keys: Vec<Statement>,
    create_indexes: Vec<Statement>,
    drop_defaults: Vec<Statement>,
    create_foreign_keys: Vec<Statement>,
}

impl Phases {
    fn into_statements(self) -> Vec<Statement> {
        [
            self.drop_foreign_keys,
            self.drop_indexes,
            self.drop_columns,
            self.add,
            self.alter,
            self.create_primary_keys,
            self.create_indexes,
            self.drop_defaults,
            self.create_foreign_keys,
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn create_index(&mut self, table: &TableSchema, index: &IndexDescriptor) {
        let stmt = Statement::Ddl(index.create_ddl(&table.schema, &table.name));
        if index.kind == IndexKind::PrimaryKey {
            self.create_primary_keys.push(stmt);
        } else {
            self.create_indexes.push(stmt);
        }
    }

    /// ADD for a column on an existing table.
    fn add_column(
        &mut self,
        table: &TableSchema,
        column: &ColumnDescriptor,
        has_rows: bool,
    ) -> Result<(), ConfigError> {
        let mut def = column.to_column_def();
        if !column.nullable && !column.is_identity() && has_rows {
            let Some(default) = literal_default(column) else {
                return Err(ConfigError::MissingMigrationDefault {
                    table: table.qualified_name(),
                    column: column.name.clone(),
                });
            };
            let constraint = default_name(&table.name, &column.name);
            def = def.default_named(&constraint, default);
            self.drop_defaults.push(
                AlterTable::new(&table.name, AlterAction::DropConstraint { name: constraint })
                    .schema(&table.schema)
                    .into_statement(),
            );
        }
        self.add.push(
            AlterTable::new(&table.name, AlterAction::AddColumn(def))
                .schema(&table.schema)
                .into_statement(),
        );
        Ok(())
    }

    fn drop_column(&mut self, table: &TableSchema, name: &str) {
        self.drop_columns.push(
            AlterTable::new(
                &table.name,
                AlterAction::DropColumn {
                    name: name.to_string(),
                },
            )
            .schema(&table.schema)
            .into_statement(),
        );
    }
}

trait IntoStatement {
    fn into_statement(self) -> Statement;
}

impl IntoStatement for AlterTable {
    fn into_statement(self) -> Statement {
        Statement::Ddl(self.into())
    }
}

/// An ordered list of statements converging live tables on desired ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    pub statements: Vec<Statement>,
    /// Tables created or changed, in plan order.
    pub touched: Vec<String>,
}

fn push_unique<T: Clone>(list: &mut Vec<T>, item: &T, name: impl Fn(&T) -> &str) {
    if !list.iter().any(|x| name(x).eq_ignore_ascii_case(name(item))) {
        list.push(item.clone());
    }
}

fn index_name(i: &IndexDescriptor) -> &str {
    &i.name
}

fn fk_name(f: &ForeignKeyDescriptor) -> &str {
    &f.name
}

/// Per-table work for an existing table.
struct Existing<'a> {
    state: TableState<'a>,
    live: &'a TableSchema,
    diff: TableDiff,
    drop_indexes: Vec<IndexDescriptor>,
    drop_foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl MigrationPlan {
    /// Plan the installation or migration of a table group.
    pub fn install(states: &[TableState<'_>]) -> Result<Self, ConfigError> {
        let mut phases = Phases::default();
        let mut plan = MigrationPlan::default();
        let mut existing: Vec<Existing<'_>> = Vec::new();

        for state in states {
            let desired = state.desired;
            match state.live {
                None => {
                    info!(table = %desired.qualified_name(), "creating table");
                    plan.touched.push(desired.name.clone());
                    phases.add.push(Statement::Ddl(desired.create_ddl().into()));
                    for index in desired.indexes.iter().filter(|i| i.kind != IndexKind::PrimaryKey) {
                        phases.create_index(desired, index);
                    }
                    for fk in &desired.foreign_keys {
                        phases
                            .create_foreign_keys
                            .push(Statement::Ddl(fk.create_ddl(&desired.schema, &desired.name)));
                    }
                }
                Some(live) => {
                    let diff = TableDiff::compute(desired, live);
                    if diff.is_empty() {
                        debug!(table = %desired.qualified_name(), "table is up to date");
                        continue;
                    }
                    info!(
                        table = %desired.qualified_name(),
                        changes = diff.change_count(),
                        "migrating table"
                    );
                    plan.touched.push(desired.name.clone());

                    let disturbed: Vec<String> =
                        diff.disturbed_columns().map(str::to_string).collect();
                    let mut drop_indexes = diff.removed_indexes.clone();
                    for index in &live.indexes {
                        if disturbed.iter().any(|c| index.touches(c)) {
                            push_unique(&mut drop_indexes, index, index_name);
                        }
                    }
                    let mut drop_foreign_keys = diff.removed_foreign_keys.clone();
                    for fk in &live.foreign_keys {
                        if disturbed.iter().any(|c| fk.touches(c)) {
                            push_unique(&mut drop_foreign_keys, fk, fk_name);
                        }
                    }
                    existing.push(Existing {
                        state: *state,
                        live,
                        diff,
                        drop_indexes,
                        drop_foreign_keys,
                    });
                }
            }
        }

        // Keys about to be dropped take referencing foreign keys of other tables with them.
        let dropped_keys: Vec<(String, IndexDescriptor)> = existing
            .iter()
            .flat_map(|e| {
                e.drop_indexes
                    .iter()
                    .filter(|i| i.kind != IndexKind::NonUnique)
                    .map(move |i| (e.live.name.clone(), i.clone()))
            })
            .collect();
        for e in existing.iter_mut() {
            for fk in &e.live.foreign_keys {
                let references_dropped = dropped_keys.iter().any(|(table, index)| {
                    fk.referenced_table.eq_ignore_ascii_case(table)
                        && fk.referenced_columns.iter().any(|c| index.touches(c))
                });
                if references_dropped {
                    push_unique(&mut e.drop_foreign_keys, fk, fk_name);
                }
            }
        }
        // Same for unchanged tables whose foreign keys point into the group.
        let changed: HashSet<&str> = existing.iter().map(|e| e.live.name.as_str()).collect();
        let mut extra_fk_drops: Vec<(&TableSchema, &ForeignKeyDescriptor)> = Vec::new();
        for state in states {
            let Some(live) = state.live else { continue };
            if changed.contains(live.name.as_str()) {
                continue;
            }
            for fk in &live.foreign_keys {
                let references_dropped = dropped_keys.iter().any(|(table, index)| {
                    fk.referenced_table.eq_ignore_ascii_case(table)
                        && fk.referenced_columns.iter().any(|c| index.touches(c))
                });
                if references_dropped {
                    extra_fk_drops.push((state.desired, fk));
                }
            }
        }

        for e in &existing {
            let desired = e.state.desired;
            let (schema, table) = (&desired.schema, &desired.name);

            for fk in &e.drop_foreign_keys {
                phases.drop_foreign_keys.push(Statement::Ddl(fk.drop_ddl(schema, table)));
            }
            for index in &e.drop_indexes {
                phases.drop_indexes.push(Statement::Ddl(index.drop_ddl(schema, table)));
            }

            for column in &e.diff.removed_columns {
                phases.drop_column(desired, &column.name);
            }
            for column in &e.diff.added_columns {
                phases.add_column(desired, column, e.state.has_rows)?;
            }
            for altered in &e.diff.altered_columns {
                if altered.needs_rebuild() {
                    phases.drop_column(desired, &altered.live.name);
                    phases.add_column(desired, &altered.desired, e.state.has_rows)?;
                    continue;
                }
                if altered.becomes_required() && e.state.has_rows {
                    let Some(default) = literal_default(&altered.desired) else {
                        return Err(ConfigError::MissingMigrationDefault {
                            table: desired.qualified_name(),
                            column: altered.desired.name.clone(),
                        });
                    };
                    phases.alter.push(Statement::Update(
                        Update::table(table.clone())
                            .schema(schema.clone())
                            .set(altered.desired.name.clone(), default)
                            .filter(col(&altered.desired.name).is_null()),
                    ));
                }
                phases.alter.push(
                    AlterTable::new(table, AlterAction::AlterColumn(altered.desired.to_column_def()))
                        .schema(schema)
                        .into_statement(),
                );
            }

            let mut create_indexes = e.diff.added_indexes.clone();
            for dropped in &e.drop_indexes {
                if let Some(index) = desired.index(&dropped.name) {
                    push_unique(&mut create_indexes, index, index_name);
                }
            }
            for index in &create_indexes {
                phases.create_index(desired, index);
            }

            let mut create_foreign_keys = e.diff.added_foreign_keys.clone();
            for dropped in &e.drop_foreign_keys {
                if let Some(fk) = desired
                    .foreign_keys
                    .iter()
                    .find(|f| f.name.eq_ignore_ascii_case(&dropped.name))
                {
                    push_unique(&mut create_foreign_keys, fk, fk_name);
                }
            }
            for fk in &create_foreign_keys {
                phases
                    .create_foreign_keys
                    .push(Statement::Ddl(fk.create_ddl(schema, table)));
            }
        }

        for (desired, fk) in extra_fk_drops {
            if !plan.touched.contains(&desired.name) {
                plan.touched.push(desired.name.clone());
            }
            phases
                .drop_foreign_keys
                .push(Statement::Ddl(fk.drop_ddl(&desired.schema, &desired.name)));
            if let Some(d) = desired
                .foreign_keys
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(&fk.name))
            {
                phases
                    .create_foreign_keys
                    .push(Statement::Ddl(d.create_ddl(&desired.schema, &desired.name)));
            }
        }

        plan.statements = phases.into_statements();
        Ok(plan)
    }

    /// Drop a table group. `tables` is in install order (parents first);
    /// tables are dropped in reverse so referencing tables go first.
    pub fn uninstall(tables: &[&TableSchema]) -> Self {
        let mut plan = MigrationPlan::default();
        for table in tables.iter().rev() {
            plan.touched.push(table.name.clone());
            plan.statements.push(Statement::Ddl(
                DropTable::new(&table.name)
                    .schema(&table.schema)
                    .if_exists()
                    .into(),
            ));
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// T-SQL text with a batch separator after every statement.
    pub fn to_script(&self) -> String {
        self.statements
            .iter()
            .map(|s| format!("{}\nGO\n", s.to_sql()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::descriptor::DefaultValue;
    use crate::schema::model::ColumnRole;
    use crate::sql::types::ColumnType;

    fn table(columns: Vec<ColumnDescriptor>) -> TableSchema {
        let mut t = TableSchema::new("dbo", "T");
        t.columns = columns;
        t.indexes = vec![IndexDescriptor::new(
            "PK_T",
            vec!["A".into()],
            IndexKind::PrimaryKey,
        )];
        t
    }

    fn base_columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("A", ColumnType::Int32),
            ColumnDescriptor::new("B", ColumnType::Text(Some(10))).nullable(),
        ]
    }

    #[test]
    fn test_up_to_date_table_emits_nothing() {
        let t = table(base_columns());
        let plan = MigrationPlan::install(&[TableState::new(&t, Some(&t), true)]).unwrap();
        assert!(plan.is_empty());
        assert!(plan.touched.is_empty());
    }

    #[test]
    fn test_new_table_is_created() {
        let t = table(base_columns());
        let plan = MigrationPlan::install(&[TableState::new(&t, None, false)]).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.to_script().starts_with("CREATE TABLE [dbo].[T]"));
    }

    #[test]
    fn test_required_column_uses_migration_default() {
        let live = table(base_columns());
        let mut columns = base_columns();
        columns.push(
            ColumnDescriptor::new("C", ColumnType::Int32)
                .migration_default(Some(DefaultValue::Int(0)))
                .role(ColumnRole::Live),
        );
        let desired = table(columns);
        let plan = MigrationPlan::install(&[TableState::new(&desired, Some(&live), true)]).unwrap();
        insta::assert_snapshot!(plan.to_script(), @r"
        ALTER TABLE [dbo].[T] ADD [C] INT NOT NULL CONSTRAINT [DF_T_C] DEFAULT 0
        GO
        ALTER TABLE [dbo].[T] DROP CONSTRAINT [DF_T_C]
        GO
        ");
    }

    #[test]
    fn test_required_column_without_default_fails_on_populated_table() {
        let live = table(base_columns());
        let mut columns = base_columns();
        columns.push(ColumnDescriptor::new("C", ColumnType::Int32));
        let desired = table(columns);
        let err = MigrationPlan::install(&[TableState::new(&desired, Some(&live), true)]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingMigrationDefault { .. }));

        // An empty table takes the column as is.
        let plan = MigrationPlan::install(&[TableState::new(&desired, Some(&live), false)]).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_altered_key_column_drops_and_recreates_key() {
        let live = table(base_columns());
        let mut columns = base_columns();
        columns[0] = ColumnDescriptor::new("A", ColumnType::Int64);
        let desired = table(columns);
        let plan = MigrationPlan::install(&[TableState::new(&desired, Some(&live), true)]).unwrap();
        let sql: Vec<String> = plan.statements.iter().map(|s| s.to_sql()).collect();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE [dbo].[T] DROP CONSTRAINT [PK_T]",
                "ALTER TABLE [dbo].[T] ALTER COLUMN [A] BIGINT NOT NULL",
                "ALTER TABLE [dbo].[T] ADD CONSTRAINT [PK_T] PRIMARY KEY ([A])",
            ]
        );
    }

    #[test]
    fn test_nulls_replaced_before_alter_to_required() {
        let live = table(base_columns());
        let mut columns = base_columns();
        columns[1] = ColumnDescriptor::new("B", ColumnType::Text(Some(10)))
            .migration_default(Some(DefaultValue::Text("none".into())));
        let desired = table(columns);
        let plan = MigrationPlan::install(&[TableState::new(&desired, Some(&live), true)]).unwrap();
        let sql: Vec<String> = plan.statements.iter().map(|s| s.to_sql()).collect();
        assert_eq!(sql[0], "UPDATE [dbo].[T]\nSET [B] = 'none'\nWHERE [B] IS NULL");
        assert_eq!(sql[1], "ALTER TABLE [dbo].[T] ALTER COLUMN [B] NVARCHAR(10) NOT NULL");
    }

    #[test]
    fn test_uninstall_reverses_order() {
        let parent = table(base_columns());
        let mut child = table(base_columns());
        child.name = "T_Items".into();
        let plan = MigrationPlan::uninstall(&[&parent, &child]);
        assert_eq!(plan.touched, vec!["T_Items", "T"]);
        assert_eq!(plan.statements[0].to_sql(), "DROP TABLE IF EXISTS [dbo].[T_Items]");
    }
}
