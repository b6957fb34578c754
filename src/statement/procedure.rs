//! Stored procedures and table types of one dataset table.
//!
//! Each top-level table gets `{table}__Get`, `__Add`, `__Update` and
//! `__Remove`, plus the `ByIdentity` variants when it has an identity.
//! First-level subtables travel as table-valued parameters of type
//! `{subtable}_T`; `__Add` and `__Update` replace the parent's rows with the
//! parameter's rows. `__Update` touches children only when exactly one parent
//! row matched and ends by selecting that count as `RowsAffected`. Removal
//! relies on the cascading foreign keys.
//!
//! A table whose subtables have subtables of their own gets no procedures: a
//! table parameter cannot tie grandchild rows to the child rows it carries.

use super::crud::{self, address_columns, ORIGINAL_PREFIX};
use super::KeyKind;
use crate::error::{ConfigError, Result};
use crate::mapper::row::param_name;
use crate::schema::model::{ColumnDescriptor, ColumnRole, Subtable, TableSchema, PARENT_COLUMN};
use crate::sql::ddl::{
    CreateProcedure, CreateTableType, DdlStatement, DropProcedure, DropType, ProcedureParam,
    ProcedureStatement,
};
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::sql::dml::{Delete, Insert};
use crate::sql::expr::{col, lit_int, param, raw_sql, Expr, ExprExt};
use crate::sql::query::{Query, SelectExpr, TableRef};

/// Variable holding the parent link value inside `__Add` and `__Update`.
const LINK_VARIABLE: &str = "__Link";

/// Rows matched by the UPDATE of `__Update`.
const COUNT_VARIABLE: &str = "__Count";

/// One generated procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureKind {
    Get,
    GetByIdentity,
    Add,
    Update,
    UpdateByIdentity,
    Remove,
    RemoveByIdentity,
}

impl ProcedureKind {
    pub const ALL: [ProcedureKind; 7] = [
        ProcedureKind::Get,
        ProcedureKind::GetByIdentity,
        ProcedureKind::Add,
        ProcedureKind::Update,
        ProcedureKind::UpdateByIdentity,
        ProcedureKind::Remove,
        ProcedureKind::RemoveByIdentity,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            ProcedureKind::Get => "Get",
            ProcedureKind::GetByIdentity => "GetByIdentity",
            ProcedureKind::Add => "Add",
            ProcedureKind::Update => "Update",
            ProcedureKind::UpdateByIdentity => "UpdateByIdentity",
            ProcedureKind::Remove => "Remove",
            ProcedureKind::RemoveByIdentity => "RemoveByIdentity",
        }
    }

    pub fn key_kind(&self) -> KeyKind {
        match self {
            ProcedureKind::GetByIdentity
            | ProcedureKind::UpdateByIdentity
            | ProcedureKind::RemoveByIdentity => KeyKind::Identity,
            _ => KeyKind::Key,
        }
    }

    /// Procedures a table gets; identity variants need an identity column.
    pub fn for_table(table: &TableSchema) -> Vec<ProcedureKind> {
        let has_identity = table.identity().is_some();
        Self::ALL
            .into_iter()
            .filter(|k| has_identity || k.key_kind() == KeyKind::Key)
            .collect()
    }
}

/// Whether every subtable of `table` fits in a flat table parameter.
pub fn supports_procedures(table: &TableSchema) -> bool {
    table.subtables.iter().all(|s| s.table.subtables.is_empty())
}

pub fn procedure_name(table: &TableSchema, kind: ProcedureKind) -> String {
    format!("{}__{}", table.name, kind.suffix())
}

pub fn table_type_name(sub: &TableSchema) -> String {
    format!("{}_T", sub.name)
}

fn tvp_columns(sub: &TableSchema) -> Vec<&ColumnDescriptor> {
    sub.insert_columns()
        .into_iter()
        .filter(|c| c.role != ColumnRole::Parent)
        .collect()
}

/// `CREATE TYPE ... AS TABLE` carrying a subtable's rows.
pub fn table_type(sub: &TableSchema) -> CreateTableType {
    CreateTableType::new(table_type_name(sub))
        .schema(&sub.schema)
        .columns(tvp_columns(sub).into_iter().map(ColumnDescriptor::to_column_def))
}

fn scalar(name: String, column: &ColumnDescriptor) -> ProcedureParam {
    ProcedureParam::scalar(name, column.column_type)
}

fn tvp(sub: &Subtable) -> ProcedureParam {
    ProcedureParam::table(
        param_name(&sub.property),
        Some(sub.table.schema.clone()),
        table_type_name(&sub.table),
    )
}

/// Address parameters; `prefix` applies to every column but the site.
fn address_params(table: &TableSchema, kind: KeyKind, prefix: &str) -> Result<Vec<ProcedureParam>> {
    Ok(address_columns(table, kind)?
        .into_iter()
        .map(|c| match c.role {
            ColumnRole::Site => scalar(param_name(&c.name), c),
            _ => scalar(format!("{}{}", prefix, param_name(&c.name)), c),
        })
        .collect())
}

/// Expression for the parent link value once the parent row is written.
fn link_source(table: &TableSchema, link_column: &ColumnDescriptor, kind: ProcedureKind) -> Result<Expr> {
    if !link_column.is_identity() {
        return Ok(param(&param_name(&link_column.name)));
    }
    Ok(match kind {
        ProcedureKind::Add => raw_sql("SCOPE_IDENTITY()"),
        ProcedureKind::UpdateByIdentity => {
            param(&format!("{}{}", ORIGINAL_PREFIX, param_name(&link_column.name)))
        }
        _ => {
            let lookup = crud::get(table, KeyKind::Key)?
                .select(vec![SelectExpr::new(col(&link_column.name))]);
            raw_sql(&format!("({})", lookup.to_sql(Dialect::TSql)))
        }
    })
}

/// Statements replacing one subtable's rows with a table parameter's rows.
fn replace_children(sub: &Subtable, kind: ProcedureKind) -> Vec<ProcedureStatement> {
    let mut body = Vec::new();
    if kind != ProcedureKind::Add {
        body.push(ProcedureStatement::Delete(
            Delete::from(&sub.table.name)
                .schema(&sub.table.schema)
                .filter(col(PARENT_COLUMN).eq(param(LINK_VARIABLE))),
        ));
    }
    let columns = tvp_columns(&sub.table);
    let mut select: Vec<SelectExpr> = columns.iter().map(|c| SelectExpr::new(col(&c.name))).collect();
    select.push(SelectExpr::new(param(LINK_VARIABLE)));
    let mut names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    names.push(PARENT_COLUMN.to_string());
    body.push(ProcedureStatement::Insert(
        Insert::into(&sub.table.name)
            .schema(&sub.table.schema)
            .columns(names)
            .from_select(
                Query::new()
                    .select(select)
                    .from(TableRef::variable(&param_name(&sub.property))),
            ),
    ));
    body
}

fn declare_link(
    table: &TableSchema,
    kind: ProcedureKind,
) -> Result<Option<ProcedureStatement>> {
    if table.subtables.is_empty() {
        return Ok(None);
    }
    let link_column = table
        .link_target()
        .ok_or_else(|| ConfigError::SubtableNeedsKey {
            table: table.name.clone(),
        })?;
    let source = link_source(table, link_column, kind)?;
    Ok(Some(ProcedureStatement::Raw(format!(
        "DECLARE @{} {} = {}",
        LINK_VARIABLE,
        Dialect::TSql.emit_data_type(&link_column.column_type),
        source.to_tokens().serialize(Dialect::TSql)
    ))))
}

/// One procedure of a table.
pub fn procedure(table: &TableSchema, kind: ProcedureKind) -> Result<CreateProcedure> {
    if !supports_procedures(table) {
        return Err(ConfigError::ProceduresUnsupported {
            table: table.name.clone(),
        }
        .into());
    }
    let key_kind = kind.key_kind();
    let proc = CreateProcedure::new(procedure_name(table, kind)).schema(&table.schema);
    let proc = match kind {
        ProcedureKind::Get | ProcedureKind::GetByIdentity => proc
            .params(address_params(table, key_kind, "")?)
            .statement(ProcedureStatement::Query(crud::get(table, key_kind)?)),
        ProcedureKind::Remove | ProcedureKind::RemoveByIdentity => proc
            .params(address_params(table, key_kind, "")?)
            .statement(ProcedureStatement::Delete(crud::delete(table, key_kind)?)),
        ProcedureKind::Add => {
            let mut proc = proc
                .params(table.insert_columns().into_iter().map(|c| scalar(param_name(&c.name), c)))
                .params(table.subtables.iter().map(tvp))
                .statement(ProcedureStatement::Insert(crud::insert(table)));
            if let Some(declare) = declare_link(table, kind)? {
                proc = proc.statement(declare);
            }
            for sub in &table.subtables {
                for stmt in replace_children(sub, kind) {
                    proc = proc.statement(stmt);
                }
            }
            proc
        }
        ProcedureKind::Update | ProcedureKind::UpdateByIdentity => {
            let address = address_params(table, key_kind, ORIGINAL_PREFIX)?;
            let mut proc = proc
                .params(
                    table
                        .insert_columns()
                        .into_iter()
                        .filter(|c| !matches!(c.role, ColumnRole::Site | ColumnRole::Parent))
                        .map(|c| scalar(param_name(&c.name), c)),
                )
                .params(address)
                .params(table.subtables.iter().map(tvp))
                .statement(ProcedureStatement::Update(crud::update(table, key_kind)?))
                .raw(format!("DECLARE @{} INT = @@ROWCOUNT", COUNT_VARIABLE));
            if let Some(declare) = declare_link(table, kind)? {
                let mut body = vec![declare];
                for sub in &table.subtables {
                    body.extend(replace_children(sub, kind));
                }
                proc = proc.statement(ProcedureStatement::If {
                    condition: param(COUNT_VARIABLE).eq(lit_int(1)),
                    body,
                });
            }
            proc.raw(format!("SELECT @{} AS [RowsAffected]", COUNT_VARIABLE))
        }
    };
    Ok(proc)
}

/// Every procedure of a table.
pub fn procedures(table: &TableSchema) -> Result<Vec<CreateProcedure>> {
    ProcedureKind::for_table(table)
        .into_iter()
        .map(|kind| procedure(table, kind))
        .collect()
}

/// Drop-if-exists, then create, for every table type and procedure.
///
/// Procedures are dropped before the types they take and created after.
pub fn install_statements(table: &TableSchema) -> Result<Vec<DdlStatement>> {
    let created = procedures(table)?;
    let mut out = drop_statements(table);
    out.extend(table.subtables.iter().map(|s| DdlStatement::from(table_type(&s.table))));
    out.extend(created.into_iter().map(DdlStatement::from));
    Ok(out)
}

/// Drop-if-exists for every procedure, then every table type.
pub fn drop_statements(table: &TableSchema) -> Vec<DdlStatement> {
    let mut out: Vec<DdlStatement> = ProcedureKind::for_table(table)
        .into_iter()
        .map(|kind| {
            DropProcedure::new(procedure_name(table, kind))
                .schema(&table.schema)
                .if_exists()
                .into()
        })
        .collect();
    out.extend(table.subtables.iter().map(|s| {
        DdlStatement::from(
            DropType::new(table_type_name(&s.table))
                .schema(&s.table.schema)
                .if_exists(),
        )
    }));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::descriptor::ValueType;
    use crate::schema::model::{
        IndexDescriptor, IndexKind, SubtableLink, ROW_ID_COLUMN, SITE_COLUMN,
    };
    use crate::sql::types::ColumnType;
    use insta::assert_snapshot;

    fn prop(name: &str, ty: ColumnType) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ty).role(ColumnRole::Property {
            path: vec![name.to_string()],
            value_type: ValueType::Int32,
        })
    }

    fn orders() -> TableSchema {
        let mut lines = TableSchema::new("dbo", "Orders_Lines");
        lines.columns = vec![
            ColumnDescriptor::new(ROW_ID_COLUMN, ColumnType::Int32)
                .identity()
                .role(ColumnRole::RowId),
            prop("Qty", ColumnType::Int32),
            ColumnDescriptor::new(PARENT_COLUMN, ColumnType::Int32).role(ColumnRole::Parent),
        ];
        lines.indexes = vec![IndexDescriptor::new(
            "PK_Orders_Lines",
            vec![ROW_ID_COLUMN.into()],
            IndexKind::PrimaryKey,
        )];
        lines.link = Some(SubtableLink {
            parent_table: "Orders".into(),
            parent_column: "Id".into(),
        });

        let mut t = TableSchema::new("dbo", "Orders");
        t.type_key = "Shop.Order".into();
        t.site_scoped = true;
        t.columns = vec![
            prop("Id", ColumnType::Int32).identity(),
            prop("Code", ColumnType::Text(Some(10))),
            ColumnDescriptor::new(SITE_COLUMN, ColumnType::Text(Some(100))).role(ColumnRole::Site),
        ];
        t.indexes = vec![
            IndexDescriptor::new(
                "PK_Orders",
                vec!["Code".into(), SITE_COLUMN.into()],
                IndexKind::PrimaryKey,
            ),
            IndexDescriptor::new("UX_Orders_Id", vec!["Id".into()], IndexKind::UniqueKey),
        ];
        t.subtables = vec![Subtable {
            property: "Lines".into(),
            table: lines,
        }];
        t
    }

    #[test]
    fn test_table_type_skips_link_and_row_id() {
        assert_snapshot!(table_type(&orders().subtables[0].table).to_sql(Dialect::TSql), @r"
        CREATE TYPE [dbo].[Orders_Lines_T] AS TABLE (
            [Qty] INT NOT NULL
        )
        ");
    }

    #[test]
    fn test_get_procedure() {
        let sql = procedure(&orders(), ProcedureKind::Get).unwrap().to_sql(Dialect::TSql);
        assert_snapshot!(sql, @r"
        CREATE PROCEDURE [dbo].[Orders__Get]
            @Code NVARCHAR(10),
            @__Site NVARCHAR(100)
        AS
        BEGIN
        SELECT TOP (1)
            [Id],
            [Code],
            [__Site]
        FROM [dbo].[Orders]
        WHERE [Code] = @Code AND [__Site] = @__Site;
        END
        ");
    }

    #[test]
    fn test_add_replaces_children_from_table_parameter() {
        let sql = procedure(&orders(), ProcedureKind::Add).unwrap().to_sql(Dialect::TSql);
        assert!(sql.contains("@Lines [dbo].[Orders_Lines_T] READONLY"));
        assert!(sql.contains("DECLARE @__Link INT = SCOPE_IDENTITY()"));
        assert!(sql.contains("INSERT INTO [dbo].[Orders_Lines] ([Qty], [__Parent])"));
        assert!(sql.contains("FROM @Lines"));
        assert!(!sql.contains("DELETE"));
    }

    #[test]
    fn test_update_by_identity_links_original_identity() {
        let sql = procedure(&orders(), ProcedureKind::UpdateByIdentity)
            .unwrap()
            .to_sql(Dialect::TSql);
        assert!(sql.contains("@Original_Id INT"));
        assert!(sql.contains("DECLARE @__Link INT = @Original_Id"));
        assert!(sql.contains("DELETE FROM [dbo].[Orders_Lines]\nWHERE [__Parent] = @__Link"));
    }

    #[test]
    fn test_update_by_key_looks_up_identity() {
        let sql = procedure(&orders(), ProcedureKind::Update).unwrap().to_sql(Dialect::TSql);
        assert!(sql.contains("@Original_Code NVARCHAR(10)"));
        assert!(sql.contains("DECLARE @__Link INT = (SELECT TOP (1)"));
    }

    #[test]
    fn test_update_touches_children_only_for_one_matched_row() {
        let sql = procedure(&orders(), ProcedureKind::Update).unwrap().to_sql(Dialect::TSql);
        let update = sql.find("UPDATE [dbo].[Orders]").unwrap();
        let count = sql.find("DECLARE @__Count INT = @@ROWCOUNT;").unwrap();
        let guard = sql.find("IF @__Count = 1\nBEGIN").unwrap();
        let delete = sql.find("DELETE FROM [dbo].[Orders_Lines]").unwrap();
        let result = sql.find("SELECT @__Count AS [RowsAffected];").unwrap();
        assert!(update < count && count < guard && guard < delete && delete < result);
    }

    #[test]
    fn test_update_without_children_still_reports_count() {
        let mut t = orders();
        t.subtables.clear();
        let sql = procedure(&t, ProcedureKind::Update).unwrap().to_sql(Dialect::TSql);
        assert!(!sql.contains("IF @__Count"));
        assert!(sql.contains("SELECT @__Count AS [RowsAffected];"));
    }

    #[test]
    fn test_nested_subtables_get_no_procedures() {
        let mut t = orders();
        let mut serials = TableSchema::new("dbo", "Orders_Lines_Serials");
        serials.columns = vec![
            ColumnDescriptor::new(ROW_ID_COLUMN, ColumnType::Int32)
                .identity()
                .role(ColumnRole::RowId),
            ColumnDescriptor::new(PARENT_COLUMN, ColumnType::Int32).role(ColumnRole::Parent),
        ];
        t.subtables[0].table.subtables.push(Subtable {
            property: "Serials".into(),
            table: serials,
        });
        assert!(!supports_procedures(&t));
        assert!(matches!(
            install_statements(&t).unwrap_err(),
            crate::error::Error::Config(ConfigError::ProceduresUnsupported { ref table }) if table == "Orders"
        ));
        // Dropping leftovers stays possible.
        assert_eq!(drop_statements(&t).len(), 8);
    }

    #[test]
    fn test_identity_variants_need_identity() {
        let mut t = orders();
        t.columns[0].identity = None;
        t.subtables.clear();
        let kinds = ProcedureKind::for_table(&t);
        assert_eq!(
            kinds,
            vec![ProcedureKind::Get, ProcedureKind::Add, ProcedureKind::Update, ProcedureKind::Remove]
        );
    }

    #[test]
    fn test_install_order() {
        let stmts = install_statements(&orders()).unwrap();
        let names: Vec<&str> = stmts.iter().map(|s| s.object_name()).collect();
        assert_eq!(names.len(), 7 + 1 + 1 + 7);
        assert_eq!(names[0], "Orders__Get");
        assert_eq!(names[7], "Orders_Lines_T");
        assert_eq!(names[8], "Orders_Lines_T");
        assert_eq!(names[9], "Orders__Get");
    }
}
