//! Worker connection.
//!
//! SQL Server is reached through an external worker process that owns the
//! driver. The engine renders each [`Statement`] to T-SQL and sends the text
//! with its named parameters:
//!
//! ```text
//! relmap ──stdin (NDJSON)──▶ worker ──TDS──▶ SQL Server
//!        ◀─stdout (NDJSON)──
//! ```
//!
//! A [`WorkerFactory`] spawns the worker once and shares it between its
//! connections; each [`WorkerConnection`] is a session inside the worker.

mod client;
mod error;
pub mod protocol;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

pub use client::WorkerClient;
pub use error::{WorkerError, WorkerResult};

use crate::error::{DbError, DbResult};
use crate::mapper::row::Params;
use crate::provider::connection::{
    Connection, ConnectionFactory, ExecResult, IsolationLevel, Statement,
};
use protocol::{
    encode_args, methods, Ack, BeginParams, ExecuteParams, ExecuteResponse, OpenSessionParams,
    OpenSessionResponse, SessionParams,
};

/// Slack on top of the statement timeout before the client gives up on a
/// request the worker never answered.
const REQUEST_GRACE: Duration = Duration::from_secs(30);

/// Spawns the worker on first use and opens sessions in it.
#[derive(Debug)]
pub struct WorkerFactory {
    worker_path: PathBuf,
    statement_timeout: Duration,
    client: OnceCell<Arc<WorkerClient>>,
}

impl WorkerFactory {
    pub fn new(worker_path: impl Into<PathBuf>, statement_timeout: Duration) -> Self {
        Self {
            worker_path: worker_path.into(),
            statement_timeout,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> DbResult<Arc<WorkerClient>> {
        let client = self
            .client
            .get_or_try_init(|| async {
                WorkerClient::spawn(&self.worker_path, self.statement_timeout + REQUEST_GRACE)
                    .await
                    .map(Arc::new)
            })
            .await?;
        if !client.is_alive() {
            return Err(WorkerError::WorkerExited.into());
        }
        Ok(client.clone())
    }
}

#[async_trait]
impl ConnectionFactory for WorkerFactory {
    async fn connect(
        &self,
        connection_string: &str,
        dedicated: bool,
    ) -> DbResult<Box<dyn Connection>> {
        let client = self.client().await?;
        Ok(Box::new(WorkerConnection {
            client,
            connection_string: connection_string.to_string(),
            dedicated,
            timeout_secs: self.statement_timeout.as_secs(),
            session: None,
            in_transaction: false,
        }))
    }
}

/// One session in the worker.
#[derive(Debug)]
pub struct WorkerConnection {
    client: Arc<WorkerClient>,
    connection_string: String,
    dedicated: bool,
    timeout_secs: u64,
    session: Option<String>,
    in_transaction: bool,
}

impl WorkerConnection {
    fn session(&self) -> DbResult<String> {
        self.session
            .clone()
            .ok_or_else(|| DbError::connection("connection is not open"))
    }

    async fn session_call(&mut self, method: &str) -> DbResult<()> {
        let session = self.session()?;
        let _: Ack = self.client.request(method, SessionParams { session }).await?;
        Ok(())
    }
}

#[async_trait]
impl Connection for WorkerConnection {
    async fn open(&mut self) -> DbResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let response: OpenSessionResponse = self
            .client
            .request(
                methods::SESSION_OPEN,
                OpenSessionParams {
                    connection_string: self.connection_string.clone(),
                    dedicated: self.dedicated,
                },
            )
            .await?;
        debug!(session = %response.session, dedicated = self.dedicated, "worker session opened");
        self.session = Some(response.session);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    async fn execute(&mut self, statement: &Statement, params: &Params) -> DbResult<ExecResult> {
        let session = self.session()?;
        let sql = statement.to_sql();
        let response: ExecuteResponse = self
            .client
            .request(
                methods::SQL_EXECUTE,
                ExecuteParams {
                    session,
                    sql,
                    args: encode_args(params),
                    timeout_secs: self.timeout_secs,
                },
            )
            .await?;
        let rows_affected = response.rows_affected;
        let rows = response.into_rows()?;
        Ok(ExecResult {
            rows_affected: rows_affected.max(rows.len() as u64),
            rows,
        })
    }

    async fn begin(&mut self, isolation: IsolationLevel) -> DbResult<()> {
        let session = self.session()?;
        if self.in_transaction {
            return Err(DbError::protocol("a transaction is already in progress"));
        }
        let _: Ack = self
            .client
            .request(
                methods::TX_BEGIN,
                BeginParams {
                    session,
                    isolation: isolation.as_sql().to_string(),
                },
            )
            .await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::protocol("no transaction to commit"));
        }
        self.in_transaction = false;
        self.session_call(methods::TX_COMMIT).await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::protocol("no transaction to roll back"));
        }
        self.in_transaction = false;
        self.session_call(methods::TX_ROLLBACK).await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn close(&mut self) -> DbResult<()> {
        if self.session.is_none() {
            return Ok(());
        }
        // The worker rolls back an open transaction when its session closes.
        let result = self.session_call(methods::SESSION_CLOSE).await;
        self.session = None;
        self.in_transaction = false;
        result
    }
}
