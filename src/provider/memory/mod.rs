//! In-memory SQL Server stand-in.
//!
//! A [`MemoryServer`] hosts one [`Database`] per (data source, database)
//! pair of the connection strings it is asked to connect to. Connections
//! share that database, so a second connection sees what the first wrote.
//! Transactions snapshot the database on `begin` and restore it on
//! `rollback`; isolation between concurrent transactions is not modeled.

mod eval;
mod exec;
mod table;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

pub use eval::{like, Scope, Source, ERR_UNDECLARED_VARIABLE};
pub use exec::{Database, DEFAULT_SCHEMA};
pub use table::{MemColumn, MemForeignKey, MemTable, ERR_CONVERSION, ERR_TRUNCATION};

use crate::config::ConnectionInfo;
use crate::error::{DbError, DbResult};
use crate::mapper::row::Params;
use crate::provider::connection::{
    Connection, ConnectionFactory, ExecResult, IsolationLevel, Statement,
};

type CatalogKey = (String, String);

/// Databases reachable through connection strings.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    databases: Arc<DashMap<CatalogKey, Arc<Mutex<Database>>>>,
    connects: Arc<AtomicUsize>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The database a connection string points at, created on first use.
    pub fn database(&self, connection_string: &str) -> DbResult<Arc<Mutex<Database>>> {
        let info = ConnectionInfo::parse(connection_string)
            .map_err(|e| DbError::connection(e.to_string()))?;
        Ok(self
            .databases
            .entry(info.catalog_key())
            .or_insert_with(|| Arc::new(Mutex::new(Database::new())))
            .clone())
    }

    /// Connections handed out so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MemoryServer {
    async fn connect(
        &self,
        connection_string: &str,
        dedicated: bool,
    ) -> DbResult<Box<dyn Connection>> {
        let db = self.database(connection_string)?;
        let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(connection = n, dedicated, "memory connection created");
        Ok(Box::new(MemoryConnection::new(db)))
    }
}

/// A connection to one in-memory database.
#[derive(Debug)]
pub struct MemoryConnection {
    db: Arc<Mutex<Database>>,
    open: bool,
    snapshot: Option<Database>,
}

impl MemoryConnection {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self {
            db,
            open: false,
            snapshot: None,
        }
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DbError::connection("connection is not open"))
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open(&mut self) -> DbResult<()> {
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn execute(&mut self, statement: &Statement, params: &Params) -> DbResult<ExecResult> {
        self.ensure_open()?;
        self.db.lock().execute(statement, params)
    }

    async fn begin(&mut self, isolation: IsolationLevel) -> DbResult<()> {
        self.ensure_open()?;
        if self.snapshot.is_some() {
            return Err(DbError::protocol("a transaction is already in progress"));
        }
        debug!(isolation = isolation.as_sql(), "begin transaction");
        self.snapshot = Some(self.db.lock().clone());
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| DbError::protocol("no transaction to commit"))
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| DbError::protocol("no transaction to roll back"))?;
        *self.db.lock() = snapshot;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    async fn close(&mut self) -> DbResult<()> {
        if self.snapshot.is_some() {
            self.rollback().await?;
        }
        self.open = false;
        Ok(())
    }
}
