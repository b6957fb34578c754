//! DDL (Data Definition Language) support.
//!
//! Builders for the statements schema installation and migration emit:
//! tables, columns, named constraints, indexes, table types and stored
//! procedures. A [`Script`] joins statements into batches separated by the
//! dialect's batch separator.
//!
//! # Examples
//!
//! ```ignore
//! use relmap::sql::ddl::{ColumnDef, CreateTable, TableConstraint};
//! use relmap::sql::dialect::Dialect;
//! use relmap::sql::types::ColumnType;
//!
//! let table = CreateTable::new("Customers")
//!     .schema("dbo")
//!     .column(ColumnDef::new("Id", ColumnType::Int32).identity())
//!     .column(ColumnDef::new("Name", ColumnType::Text(Some(50))).nullable())
//!     .constraint(TableConstraint::primary_key("PK_Customers", ["Id"]));
//!
//! println!("{}", table.to_sql(Dialect::TSql));
//! ```

use super::dialect::{Dialect, SqlDialect};
use super::dml::{Delete, Insert, Update};
use super::expr::Expr;
use super::query::Query;
use super::token::{Token, TokenStream};
use super::types::ColumnType;

/// DDL statement types.
#[derive(Debug, Clone, PartialEq)]
pub enum DdlStatement {
    CreateTable(CreateTable),
    AlterTable(AlterTable),
    DropTable(DropTable),
    CreateIndex(CreateIndex),
    DropIndex(DropIndex),
    CreateTableType(CreateTableType),
    DropType(DropType),
    CreateProcedure(CreateProcedure),
    DropProcedure(DropProcedure),
}

impl DdlStatement {
    /// Generate SQL string.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        match self {
            DdlStatement::CreateTable(s) => s.to_tokens(dialect),
            DdlStatement::AlterTable(s) => s.to_tokens(dialect),
            DdlStatement::DropTable(s) => s.to_tokens(dialect),
            DdlStatement::CreateIndex(s) => s.to_tokens(dialect),
            DdlStatement::DropIndex(s) => s.to_tokens(dialect),
            DdlStatement::CreateTableType(s) => s.to_tokens(dialect),
            DdlStatement::DropType(s) => s.to_tokens(dialect),
            DdlStatement::CreateProcedure(s) => s.to_tokens(dialect),
            DdlStatement::DropProcedure(s) => s.to_tokens(dialect),
        }
    }

    /// Object the statement creates, alters or drops.
    pub fn object_name(&self) -> &str {
        match self {
            DdlStatement::CreateTable(s) => &s.name,
            DdlStatement::AlterTable(s) => &s.name,
            DdlStatement::DropTable(s) => &s.name,
            DdlStatement::CreateIndex(s) => &s.name,
            DdlStatement::DropIndex(s) => &s.name,
            DdlStatement::CreateTableType(s) => &s.name,
            DdlStatement::DropType(s) => &s.name,
            DdlStatement::CreateProcedure(s) => &s.name,
            DdlStatement::DropProcedure(s) => &s.name,
        }
    }
}

macro_rules! impl_from_ddl {
    ($($ty:ident),* $(,)?) => {
        $(
            impl From<$ty> for DdlStatement {
                fn from(s: $ty) -> Self {
                    DdlStatement::$ty(s)
                }
            }
        )*
    };
}

impl_from_ddl!(
    CreateTable,
    AlterTable,
    DropTable,
    CreateIndex,
    DropIndex,
    CreateTableType,
    DropType,
    CreateProcedure,
    DropProcedure,
);

fn qualified(schema: &Option<String>, name: &str) -> Token {
    Token::QualifiedIdent {
        schema: schema.clone(),
        name: name.to_string(),
    }
}

fn emit_column_list(ts: &mut TokenStream, columns: &[String]) {
    ts.lparen();
    for (i, col) in columns.iter().enumerate() {
        if i > 0 {
            ts.comma().space();
        }
        ts.push(Token::Ident(col.clone()));
    }
    ts.rparen();
}

fn emit_if_exists(ts: &mut TokenStream, if_exists: bool, dialect: Dialect) {
    if if_exists && dialect.supports_if_exists() {
        ts.push(Token::If).space().push(Token::Exists).space();
    }
}

// ============================================================================
// CREATE TABLE
// ============================================================================

/// CREATE TABLE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateTable {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
}

impl CreateTable {
    /// Create a new CREATE TABLE builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: vec![],
            constraints: vec![],
        }
    }

    /// Set schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a column.
    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }

    /// Add multiple columns.
    pub fn columns(mut self, cols: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns.extend(cols);
        self
    }

    /// Add a table constraint.
    pub fn constraint(mut self, constraint: TableConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Generate SQL string.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Create)
            .space()
            .push(Token::Table)
            .space()
            .push(qualified(&self.schema, &self.name))
            .space()
            .lparen();

        emit_definitions(&mut ts, &self.columns, &self.constraints, dialect);

        ts.newline().rparen();
        ts
    }
}

fn emit_definitions(
    ts: &mut TokenStream,
    columns: &[ColumnDef],
    constraints: &[TableConstraint],
    dialect: Dialect,
) {
    let mut first = true;
    for col in columns {
        if !first {
            ts.comma();
        }
        first = false;
        ts.newline().indent(1).append(&col.to_tokens(dialect));
    }
    for constraint in constraints {
        if !first {
            ts.comma();
        }
        first = false;
        ts.newline()
            .indent(1)
            .append(&constraint.to_tokens(dialect));
    }
}

// ============================================================================
// Column Definition
// ============================================================================

/// Column definition for CREATE TABLE, ALTER TABLE ADD and table types.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
    pub identity: Option<(i64, i64)>,
    pub default: Option<DefaultConstraint>,
}

/// A named DEFAULT constraint on a column.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultConstraint {
    pub name: String,
    pub value: Expr,
}

impl ColumnDef {
    /// Create a NOT NULL column.
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
            identity: None,
            default: None,
        }
    }

    /// Allow NULL values.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set nullability explicitly.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Mark as IDENTITY(1, 1).
    pub fn identity(self) -> Self {
        self.identity_with(1, 1)
    }

    /// Mark as identity with custom seed and increment.
    pub fn identity_with(mut self, seed: i64, increment: i64) -> Self {
        self.identity = Some((seed, increment));
        self
    }

    /// Attach a named DEFAULT constraint.
    pub fn default_named(mut self, name: impl Into<String>, value: Expr) -> Self {
        self.default = Some(DefaultConstraint {
            name: name.into(),
            value,
        });
        self
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = self.type_tokens(dialect, true);

        if let Some(default) = &self.default {
            ts.space()
                .push(Token::Constraint)
                .space()
                .push(Token::Ident(default.name.clone()))
                .space()
                .push(Token::Default)
                .space()
                .append(&default.value.to_tokens());
        }

        ts
    }

    /// Name, type and nullability only (the ALTER COLUMN form).
    fn type_tokens(&self, dialect: Dialect, with_identity: bool) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Ident(self.name.clone()))
            .space()
            .push(Token::Raw(dialect.emit_data_type(&self.data_type)))
            .space();
        if let (true, Some((seed, increment))) = (with_identity, self.identity) {
            ts.append(&dialect.emit_identity(seed, increment)).space();
        }
        if self.nullable {
            ts.push(Token::Null);
        } else {
            ts.push(Token::Not).space().push(Token::Null);
        }
        ts
    }
}

// ============================================================================
// Table Constraints
// ============================================================================

/// Table-level constraints. All constraints are named so migrations can drop them.
#[derive(Debug, Clone, PartialEq)]
pub enum TableConstraint {
    PrimaryKey {
        name: String,
        columns: Vec<String>,
    },
    ForeignKey {
        name: String,
        columns: Vec<String>,
        references_schema: Option<String>,
        references_table: String,
        references_columns: Vec<String>,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
    },
}

impl TableConstraint {
    /// Create a named PRIMARY KEY constraint.
    pub fn primary_key(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        TableConstraint::PrimaryKey {
            name: name.into(),
            columns: columns.into_iter().map(|c| c.into()).collect(),
        }
    }

    /// Create a named FOREIGN KEY constraint without referential actions.
    pub fn foreign_key(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
        references_table: impl Into<String>,
        references_columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        TableConstraint::ForeignKey {
            name: name.into(),
            columns: columns.into_iter().map(|c| c.into()).collect(),
            references_schema: None,
            references_table: references_table.into(),
            references_columns: references_columns.into_iter().map(|c| c.into()).collect(),
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
        }
    }

    /// Constraint name.
    pub fn name(&self) -> &str {
        match self {
            TableConstraint::PrimaryKey { name, .. } => name,
            TableConstraint::ForeignKey { name, .. } => name,
        }
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, _dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Constraint)
            .space()
            .push(Token::Ident(self.name().to_string()))
            .space();

        match self {
            TableConstraint::PrimaryKey { columns, .. } => {
                ts.push(Token::Primary).space().push(Token::Key).space();
                emit_column_list(&mut ts, columns);
            }
            TableConstraint::ForeignKey {
                columns,
                references_schema,
                references_table,
                references_columns,
                on_delete,
                on_update,
                ..
            } => {
                ts.push(Token::Foreign).space().push(Token::Key).space();
                emit_column_list(&mut ts, columns);
                ts.space()
                    .push(Token::References)
                    .space()
                    .push(qualified(references_schema, references_table))
                    .space();
                emit_column_list(&mut ts, references_columns);

                if *on_delete != ReferentialAction::NoAction {
                    ts.space()
                        .push(Token::On)
                        .space()
                        .push(Token::Delete)
                        .space()
                        .append(&on_delete.to_tokens());
                }
                if *on_update != ReferentialAction::NoAction {
                    ts.space()
                        .push(Token::On)
                        .space()
                        .push(Token::Update)
                        .space()
                        .append(&on_update.to_tokens());
                }
            }
        }

        ts
    }
}

/// Referential action for foreign key constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Cascade,
}

impl ReferentialAction {
    /// Convert to token stream.
    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        match self {
            ReferentialAction::NoAction => ts.push(Token::NoAction),
            ReferentialAction::Cascade => ts.push(Token::Cascade),
        };
        ts
    }
}

// ============================================================================
// ALTER TABLE
// ============================================================================

/// ALTER TABLE statement carrying a single action.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct AlterTable {
    pub schema: Option<String>,
    pub name: String,
    pub action: AlterAction,
}

impl AlterTable {
    /// Create a new ALTER TABLE statement.
    pub fn new(name: impl Into<String>, action: AlterAction) -> Self {
        Self {
            schema: None,
            name: name.into(),
            action,
        }
    }

    /// Set schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Generate SQL string.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Alter)
            .space()
            .push(Token::Table)
            .space()
            .push(qualified(&self.schema, &self.name))
            .space()
            .append(&self.action.to_tokens(dialect));
        ts
    }
}

/// ALTER TABLE actions.
#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    AddColumn(ColumnDef),
    DropColumn { name: String },
    AlterColumn(ColumnDef),
    AddConstraint(TableConstraint),
    DropConstraint { name: String },
}

impl AlterAction {
    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        match self {
            // T-SQL: ADD without COLUMN
            AlterAction::AddColumn(col) => {
                ts.push(Token::Add).space().append(&col.to_tokens(dialect));
            }
            AlterAction::DropColumn { name } => {
                ts.push(Token::Drop)
                    .space()
                    .push(Token::Column)
                    .space()
                    .push(Token::Ident(name.clone()));
            }
            AlterAction::AlterColumn(col) => {
                ts.push(Token::Alter)
                    .space()
                    .push(Token::Column)
                    .space()
                    .append(&col.type_tokens(dialect, false));
            }
            AlterAction::AddConstraint(constraint) => {
                ts.push(Token::Add)
                    .space()
                    .append(&constraint.to_tokens(dialect));
            }
            AlterAction::DropConstraint { name } => {
                ts.push(Token::Drop)
                    .space()
                    .push(Token::Constraint)
                    .space()
                    .push(Token::Ident(name.clone()));
            }
        }

        ts
    }
}

// ============================================================================
// DROP TABLE
// ============================================================================

/// DROP TABLE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct DropTable {
    pub if_exists: bool,
    pub schema: Option<String>,
    pub name: String,
}

impl DropTable {
    /// Create a new DROP TABLE statement.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            if_exists: false,
            schema: None,
            name: name.into(),
        }
    }

    /// Set schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add IF EXISTS.
    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    /// Generate SQL string.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Drop).space().push(Token::Table).space();
        emit_if_exists(&mut ts, self.if_exists, dialect);
        ts.push(qualified(&self.schema, &self.name));
        ts
    }
}

// ============================================================================
// CREATE INDEX / DROP INDEX
// ============================================================================

/// CREATE INDEX statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateIndex {
    pub unique: bool,
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
}

impl CreateIndex {
    /// Create a new CREATE INDEX builder.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            unique: false,
            name: name.into(),
            schema: None,
            table: table.into(),
            columns: vec![],
        }
    }

    /// Make it a unique index.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set schema of the indexed table.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add indexed columns.
    pub fn columns(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns.extend(cols.into_iter().map(|c| c.into()));
        self
    }

    /// Generate SQL string.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, _dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Create).space();
        if self.unique {
            ts.push(Token::Unique).space();
        }
        ts.push(Token::Index)
            .space()
            .push(Token::Ident(self.name.clone()))
            .space()
            .push(Token::On)
            .space()
            .push(qualified(&self.schema, &self.table))
            .space();
        emit_column_list(&mut ts, &self.columns);

        ts
    }
}

/// DROP INDEX statement (T-SQL form: `DROP INDEX name ON table`).
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct DropIndex {
    pub if_exists: bool,
    pub name: String,
    pub schema: Option<String>,
    pub table: String,
}

impl DropIndex {
    /// Create a new DROP INDEX statement.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            if_exists: false,
            name: name.into(),
            schema: None,
            table: table.into(),
        }
    }

    /// Set schema of the indexed table.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add IF EXISTS.
    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    /// Generate SQL string.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Drop).space().push(Token::Index).space();
        emit_if_exists(&mut ts, self.if_exists, dialect);
        ts.push(Token::Ident(self.name.clone()))
            .space()
            .push(Token::On)
            .space()
            .push(qualified(&self.schema, &self.table));
        ts
    }
}

// ============================================================================
// CREATE TYPE ... AS TABLE / DROP TYPE
// ============================================================================

/// User-defined table type, used for table-valued parameters.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateTableType {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl CreateTableType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: vec![],
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn columns(mut self, cols: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns.extend(cols);
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Create)
            .space()
            .push(Token::Type)
            .space()
            .push(qualified(&self.schema, &self.name))
            .space()
            .push(Token::As)
            .space()
            .push(Token::Table)
            .space()
            .lparen();
        emit_definitions(&mut ts, &self.columns, &[], dialect);
        ts.newline().rparen();
        ts
    }
}

/// DROP TYPE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct DropType {
    pub if_exists: bool,
    pub schema: Option<String>,
    pub name: String,
}

impl DropType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            if_exists: false,
            schema: None,
            name: name.into(),
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Drop).space().push(Token::Type).space();
        emit_if_exists(&mut ts, self.if_exists, dialect);
        ts.push(qualified(&self.schema, &self.name));
        ts
    }
}

// ============================================================================
// CREATE PROCEDURE / DROP PROCEDURE
// ============================================================================

/// A stored procedure parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureParam {
    pub name: String,
    pub kind: ParamKind,
}

/// Parameter type: a scalar column type or a read-only table type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Scalar(ColumnType),
    Table {
        schema: Option<String>,
        type_name: String,
    },
}

impl ProcedureParam {
    pub fn scalar(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Scalar(ty),
        }
    }

    pub fn table(name: impl Into<String>, schema: Option<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Table {
                schema,
                type_name: type_name.into(),
            },
        }
    }

    fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Param(self.name.clone())).space();
        match &self.kind {
            ParamKind::Scalar(ty) => {
                ts.push(Token::Raw(dialect.emit_data_type(ty)));
            }
            ParamKind::Table { schema, type_name } => {
                ts.push(qualified(schema, type_name))
                    .space()
                    .push(Token::ReadOnly);
            }
        }
        ts
    }
}

/// One statement of a procedure body.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcedureStatement {
    Query(Query),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    /// Control-flow fragment (DECLARE, SET) with no structured form.
    Raw(String),
    /// `IF condition BEGIN ... END`.
    If {
        condition: Expr,
        body: Vec<ProcedureStatement>,
    },
}

impl ProcedureStatement {
    fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        match self {
            ProcedureStatement::Query(q) => q.to_tokens_for_dialect(dialect),
            ProcedureStatement::Insert(i) => i.to_tokens(dialect),
            ProcedureStatement::Update(u) => u.to_tokens(dialect),
            ProcedureStatement::Delete(d) => d.to_tokens(dialect),
            ProcedureStatement::Raw(sql) => {
                let mut ts = TokenStream::new();
                ts.push(Token::Raw(sql.clone()));
                ts
            }
            ProcedureStatement::If { condition, body } => {
                let mut ts = TokenStream::new();
                ts.push(Token::If)
                    .space()
                    .append(&condition.to_tokens())
                    .newline()
                    .push(Token::Begin);
                for stmt in body {
                    ts.newline().append(&stmt.to_tokens(dialect)).semicolon();
                }
                ts.newline().push(Token::End);
                ts
            }
        }
    }
}

/// CREATE PROCEDURE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateProcedure {
    pub schema: Option<String>,
    pub name: String,
    pub params: Vec<ProcedureParam>,
    pub body: Vec<ProcedureStatement>,
}

impl CreateProcedure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            params: vec![],
            body: vec![],
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn param(mut self, param: ProcedureParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = ProcedureParam>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn statement(mut self, stmt: ProcedureStatement) -> Self {
        self.body.push(stmt);
        self
    }

    pub fn raw(self, sql: impl Into<String>) -> Self {
        self.statement(ProcedureStatement::Raw(sql.into()))
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Create)
            .space()
            .push(Token::Procedure)
            .space()
            .push(qualified(&self.schema, &self.name));

        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                ts.comma();
            }
            ts.newline().indent(1).append(&param.to_tokens(dialect));
        }

        ts.newline()
            .push(Token::As)
            .newline()
            .push(Token::Begin);
        for stmt in &self.body {
            ts.newline().append(&stmt.to_tokens(dialect)).semicolon();
        }
        ts.newline().push(Token::End);
        ts
    }
}

/// DROP PROCEDURE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct DropProcedure {
    pub if_exists: bool,
    pub schema: Option<String>,
    pub name: String,
}

impl DropProcedure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            if_exists: false,
            schema: None,
            name: name.into(),
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Drop).space().push(Token::Procedure).space();
        emit_if_exists(&mut ts, self.if_exists, dialect);
        ts.push(qualified(&self.schema, &self.name));
        ts
    }
}

// ============================================================================
// Scripts
// ============================================================================

/// An ordered list of DDL statements rendered as separate batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub statements: Vec<DdlStatement>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stmt: impl Into<DdlStatement>) {
        self.statements.push(stmt.into());
    }

    pub fn extend(&mut self, stmts: impl IntoIterator<Item = DdlStatement>) {
        self.statements.extend(stmts);
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Render every statement followed by a batch separator line.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut ts = TokenStream::new();
        for stmt in &self.statements {
            ts.append(&stmt.to_tokens(dialect));
            ts.push(Token::BatchSeparator);
        }
        ts.serialize(dialect)
    }
}

impl FromIterator<DdlStatement> for Script {
    fn from_iter<I: IntoIterator<Item = DdlStatement>>(iter: I) -> Self {
        Self {
            statements: iter.into_iter().collect(),
        }
    }
}
