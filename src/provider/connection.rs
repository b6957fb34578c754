//! The execution seam.
//!
//! Everything the engine sends to a database is a structured [`Statement`].
//! A [`Connection`] executes statements with named [`Params`]; the worker
//! connection renders them to T-SQL text, the in-memory engine interprets the
//! structure directly.

use async_trait::async_trait;

use crate::error::DbResult;
use crate::introspect::catalog::CatalogQuery;
use crate::mapper::row::{Params, Row};
use crate::sql::ddl::DdlStatement;
use crate::sql::dialect::Dialect;
use crate::sql::dml::{Delete, Insert, Update};
use crate::sql::query::Query;

/// A statement the engine executes.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(Query),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Ddl(DdlStatement),
    Catalog(CatalogQuery),
}

impl Statement {
    /// T-SQL text of the statement.
    pub fn to_sql(&self) -> String {
        let dialect = Dialect::TSql;
        match self {
            Statement::Query(q) => q.to_sql(dialect),
            Statement::Insert(i) => i.to_sql(dialect),
            Statement::Update(u) => u.to_sql(dialect),
            Statement::Delete(d) => d.to_sql(dialect),
            Statement::Ddl(d) => d.to_sql(dialect),
            Statement::Catalog(c) => c.to_sql(),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Query(_) => "query",
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Delete(_) => "delete",
            Statement::Ddl(_) => "ddl",
            Statement::Catalog(_) => "catalog",
        }
    }
}

impl From<Query> for Statement {
    fn from(q: Query) -> Self {
        Statement::Query(q)
    }
}

impl From<Insert> for Statement {
    fn from(i: Insert) -> Self {
        Statement::Insert(i)
    }
}

impl From<Update> for Statement {
    fn from(u: Update) -> Self {
        Statement::Update(u)
    }
}

impl From<Delete> for Statement {
    fn from(d: Delete) -> Self {
        Statement::Delete(d)
    }
}

impl From<DdlStatement> for Statement {
    fn from(d: DdlStatement) -> Self {
        Statement::Ddl(d)
    }
}

impl From<CatalogQuery> for Statement {
    fn from(c: CatalogQuery) -> Self {
        Statement::Catalog(c)
    }
}

/// Result of executing one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    /// Result rows (SELECT rows or OUTPUT rows).
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl ExecResult {
    pub fn rows(rows: Vec<Row>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            rows,
            rows_affected,
        }
    }

    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: vec![],
            rows_affected,
        }
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A database connection.
///
/// A connection is used by one logical operation at a time; callers
/// serialize access (the pool hands connections out behind a mutex).
#[async_trait]
pub trait Connection: Send {
    /// Open the connection. Opening an open connection does nothing.
    async fn open(&mut self) -> DbResult<()>;

    fn is_open(&self) -> bool;

    async fn execute(&mut self, statement: &Statement, params: &Params) -> DbResult<ExecResult>;

    async fn begin(&mut self, isolation: IsolationLevel) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Whether a transaction is in progress.
    fn in_transaction(&self) -> bool;

    async fn close(&mut self) -> DbResult<()> {
        Ok(())
    }
}

/// Creates connections for a connection string.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create an unopened connection. `dedicated` connections are never
    /// shared through the pool.
    async fn connect(&self, connection_string: &str, dedicated: bool)
        -> DbResult<Box<dyn Connection>>;
}
