//! DML (Data Manipulation Language) support.
//!
//! Builders for INSERT, UPDATE and DELETE. Every value travels as a named
//! parameter; the `OUTPUT` clause returns affected keys so the caller can
//! read back identities and detect concurrent deletes.
//!
//! # Examples
//!
//! ```ignore
//! use relmap::sql::dml::{Delete, Insert, Update};
//! use relmap::sql::expr::{col, param, ExprExt};
//!
//! let insert = Insert::into("Customers")
//!     .columns(["Name"])
//!     .values([param("Name")])
//!     .output(["Id"]);
//!
//! let update = Update::table("Customers")
//!     .set("Name", param("Name"))
//!     .filter(col("Id").eq(param("Id")));
//!
//! let delete = Delete::from("Customers").filter(col("Id").eq(param("Id")));
//! ```

use super::dialect::{Dialect, SqlDialect};
use super::expr::{and_all, Expr};
use super::query::Query;
use super::token::{Token, TokenStream};

fn qualified(schema: &Option<String>, name: &str) -> Token {
    Token::QualifiedIdent {
        schema: schema.clone(),
        name: name.to_string(),
    }
}

/// `OUTPUT INSERTED.[a], INSERTED.[b]`
fn emit_output(ts: &mut TokenStream, pseudo: Token, columns: &[String], dialect: Dialect) {
    if columns.is_empty() || !dialect.supports_output_clause() {
        return;
    }
    ts.push(Token::Output).space();
    for (i, col) in columns.iter().enumerate() {
        if i > 0 {
            ts.comma().space();
        }
        ts.push(pseudo.clone())
            .push(Token::Dot)
            .push(Token::Ident(col.clone()));
    }
}

// ============================================================================
// INSERT
// ============================================================================

/// INSERT statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DML statements have no effect until executed"]
pub struct Insert {
    pub schema: Option<String>,
    pub table: String,
    pub columns: Vec<String>,
    pub source: InsertSource,
    pub output: Vec<String>,
}

/// Rows an INSERT writes.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Query(Box<Query>),
}

impl Insert {
    /// Create a new INSERT statement.
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            columns: vec![],
            source: InsertSource::Values(vec![]),
            output: vec![],
        }
    }

    /// Set schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set target columns.
    pub fn columns(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = cols.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Add a row of values.
    pub fn values(mut self, vals: impl IntoIterator<Item = impl Into<Expr>>) -> Self {
        let row: Vec<Expr> = vals.into_iter().map(|v| v.into()).collect();
        match &mut self.source {
            InsertSource::Values(rows) => rows.push(row),
            InsertSource::Query(_) => self.source = InsertSource::Values(vec![row]),
        }
        self
    }

    /// INSERT ... SELECT.
    pub fn from_select(mut self, query: Query) -> Self {
        self.source = InsertSource::Query(Box::new(query));
        self
    }

    /// Columns returned through `OUTPUT INSERTED.*`.
    pub fn output(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.output = cols.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Generate SQL string.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Insert)
            .space()
            .push(Token::Into)
            .space()
            .push(qualified(&self.schema, &self.table));

        if !self.columns.is_empty() {
            ts.space().lparen();
            for (i, col) in self.columns.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.push(Token::Ident(col.clone()));
            }
            ts.rparen();
        }

        if !self.output.is_empty() && dialect.supports_output_clause() {
            ts.newline();
            emit_output(&mut ts, Token::Inserted, &self.output, dialect);
        }

        match &self.source {
            InsertSource::Values(rows) if rows.is_empty() || self.columns.is_empty() => {
                ts.newline().push(Token::Default).space().push(Token::Values);
            }
            InsertSource::Values(rows) => {
                ts.newline().push(Token::Values).space();
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        ts.comma().space();
                    }
                    ts.lparen();
                    for (j, val) in row.iter().enumerate() {
                        if j > 0 {
                            ts.comma().space();
                        }
                        ts.append(&val.to_tokens());
                    }
                    ts.rparen();
                }
            }
            InsertSource::Query(query) => {
                ts.newline().append(&query.to_tokens_for_dialect(dialect));
            }
        }

        ts
    }
}

// ============================================================================
// UPDATE
// ============================================================================

/// UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DML statements have no effect until executed"]
pub struct Update {
    pub schema: Option<String>,
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub where_clause: Option<Expr>,
    pub output: Vec<String>,
}

impl Update {
    /// Create a new UPDATE statement.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            assignments: vec![],
            where_clause: None,
            output: vec![],
        }
    }

    /// Set schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a SET assignment.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = match self.where_clause.take() {
            Some(existing) => and_all([existing, expr]),
            None => Some(expr),
        };
        self
    }

    /// Columns returned through `OUTPUT INSERTED.*`.
    pub fn output(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.output = cols.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Generate SQL string.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Update)
            .space()
            .push(qualified(&self.schema, &self.table))
            .newline()
            .push(Token::Set)
            .space();

        for (i, (column, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                ts.comma().space();
            }
            ts.push(Token::Ident(column.clone()))
                .space()
                .push(Token::Eq)
                .space()
                .append(&value.to_tokens());
        }

        if !self.output.is_empty() && dialect.supports_output_clause() {
            ts.newline();
            emit_output(&mut ts, Token::Inserted, &self.output, dialect);
        }

        if let Some(where_clause) = &self.where_clause {
            ts.newline()
                .push(Token::Where)
                .space()
                .append(&where_clause.to_tokens());
        }

        ts
    }
}

// ============================================================================
// DELETE
// ============================================================================

/// DELETE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DML statements have no effect until executed"]
pub struct Delete {
    pub schema: Option<String>,
    pub table: String,
    pub where_clause: Option<Expr>,
    pub output: Vec<String>,
}

impl Delete {
    /// Create a new DELETE statement.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            where_clause: None,
            output: vec![],
        }
    }

    /// Set schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a WHERE condition (ANDed with existing conditions).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = match self.where_clause.take() {
            Some(existing) => and_all([existing, expr]),
            None => Some(expr),
        };
        self
    }

    /// Columns returned through `OUTPUT DELETED.*`.
    pub fn output(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.output = cols.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Generate SQL string.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    /// Convert to token stream.
    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Delete)
            .space()
            .push(Token::From)
            .space()
            .push(qualified(&self.schema, &self.table));

        if !self.output.is_empty() && dialect.supports_output_clause() {
            ts.newline();
            emit_output(&mut ts, Token::Deleted, &self.output, dialect);
        }

        if let Some(where_clause) = &self.where_clause {
            ts.newline()
                .push(Token::Where)
                .space()
                .append(&where_clause.to_tokens());
        }

        ts
    }
}
