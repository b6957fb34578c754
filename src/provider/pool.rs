//! Connection pool.
//!
//! One shared connection per connection string, handed out behind a mutex
//! and counted: the connection is created on first checkout and retired when
//! the last [`PooledConnection`] drops. Opening goes through one global lock
//! so two first users of a fresh connection cannot both open it.
//!
//! Every connection the pool hands out, dedicated ones included, runs its
//! statements under the configured timeout ceiling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::mapper::row::Params;
use crate::provider::connection::{
    Connection, ConnectionFactory, ExecResult, IsolationLevel, Statement,
};

/// A connection shared between the operations that hold it.
pub type SharedConnection = Arc<AsyncMutex<Box<dyn Connection>>>;

/// A connection whose statements fail with a timeout error after a ceiling.
pub struct TimedConnection {
    inner: Box<dyn Connection>,
    timeout: Duration,
}

impl TimedConnection {
    pub fn new(inner: Box<dyn Connection>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Connection for TimedConnection {
    async fn open(&mut self) -> DbResult<()> {
        self.inner.open().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn execute(&mut self, statement: &Statement, params: &Params) -> DbResult<ExecResult> {
        debug!(kind = statement.kind(), sql = %statement.to_sql(), params = params.len(), "execute");
        match tokio::time::timeout(self.timeout, self.inner.execute(statement, params)).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(format!(
                "{} statement exceeded {} seconds",
                statement.kind(),
                self.timeout.as_secs()
            ))),
        }
    }

    async fn begin(&mut self, isolation: IsolationLevel) -> DbResult<()> {
        self.inner.begin(isolation).await
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.inner.rollback().await
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }

    async fn close(&mut self) -> DbResult<()> {
        self.inner.close().await
    }
}

struct PoolEntry {
    connection: SharedConnection,
    refs: usize,
}

/// Reference-counted connections keyed by connection string.
pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    entries: parking_lot::Mutex<HashMap<String, PoolEntry>>,
    open_lock: AsyncMutex<()>,
    statement_timeout: Duration,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connections", &self.entries.lock().len())
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, statement_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            factory,
            entries: parking_lot::Mutex::new(HashMap::new()),
            open_lock: AsyncMutex::new(()),
            statement_timeout,
        })
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Check out the shared connection for a connection string, opening it
    /// if needed. It is returned when the guard drops.
    pub async fn acquire(self: &Arc<Self>, connection_string: &str) -> DbResult<PooledConnection> {
        let existing = self.checkout(connection_string);
        let connection = match existing {
            Some(c) => c,
            None => {
                let created = self.timed(self.factory.connect(connection_string, false).await?);
                self.insert_or_checkout(connection_string, created)
            }
        };
        let guard = PooledConnection {
            pool: self.clone(),
            key: connection_string.to_string(),
            connection,
        };
        self.ensure_open(&guard.connection).await?;
        Ok(guard)
    }

    /// A new, non-pooled connection, opened.
    pub async fn dedicated(&self, connection_string: &str) -> DbResult<SharedConnection> {
        let connection = self.timed(self.factory.connect(connection_string, true).await?);
        self.ensure_open(&connection).await?;
        debug!("dedicated connection opened");
        Ok(connection)
    }

    /// Connection strings with a live pooled connection, and their counts.
    pub fn checked_out(&self) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = self
            .entries
            .lock()
            .iter()
            .map(|(k, e)| (k.clone(), e.refs))
            .collect();
        out.sort();
        out
    }

    fn timed(&self, connection: Box<dyn Connection>) -> SharedConnection {
        Arc::new(AsyncMutex::new(Box::new(TimedConnection::new(
            connection,
            self.statement_timeout,
        ))))
    }

    fn checkout(&self, key: &str) -> Option<SharedConnection> {
        let mut entries = self.entries.lock();
        entries.get_mut(key).map(|e| {
            e.refs += 1;
            e.connection.clone()
        })
    }

    /// Register a freshly created connection unless another caller got there
    /// first, in which case the other connection is shared.
    fn insert_or_checkout(&self, key: &str, created: SharedConnection) -> SharedConnection {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| {
            debug!("pooled connection created");
            PoolEntry {
                connection: created,
                refs: 0,
            }
        });
        entry.refs += 1;
        entry.connection.clone()
    }

    async fn ensure_open(&self, connection: &SharedConnection) -> DbResult<()> {
        let _open = self.open_lock.lock().await;
        let mut conn = connection.lock().await;
        if !conn.is_open() {
            conn.open().await?;
        }
        Ok(())
    }

    fn release(&self, key: &str) {
        let retired = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(entry) if entry.refs > 1 => {
                    entry.refs -= 1;
                    None
                }
                Some(_) => entries.remove(key).map(|e| e.connection),
                None => None,
            }
        };
        if let Some(connection) = retired {
            debug!("pooled connection retired");
            close_later(connection);
        }
    }
}

/// Close a connection in the background; nothing to do outside a runtime.
pub(crate) fn close_later(connection: SharedConnection) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move {
            if let Err(e) = connection.lock().await.close().await {
                warn!(error = %e, "closing connection failed");
            }
        });
    }
}

/// A checked-out pooled connection.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    key: String,
    connection: SharedConnection,
}

impl PooledConnection {
    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryServer;

    const CONN: &str = "Server=mem;Database=Pool";

    #[tokio::test]
    async fn test_shared_until_last_release() {
        let server = MemoryServer::new();
        let pool = ConnectionPool::new(Arc::new(server.clone()), Duration::from_secs(5));

        let a = pool.acquire(CONN).await.unwrap();
        let b = pool.acquire(CONN).await.unwrap();
        assert!(Arc::ptr_eq(a.connection(), b.connection()));
        assert_eq!(pool.checked_out(), vec![(CONN.to_string(), 2)]);
        assert!(a.connection().lock().await.is_open());

        drop(a);
        assert_eq!(pool.checked_out(), vec![(CONN.to_string(), 1)]);
        drop(b);
        assert!(pool.checked_out().is_empty());

        let _c = pool.acquire(CONN).await.unwrap();
        assert_eq!(server.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_dedicated_is_not_pooled() {
        let server = MemoryServer::new();
        let pool = ConnectionPool::new(Arc::new(server.clone()), Duration::from_secs(5));
        let _pooled = pool.acquire(CONN).await.unwrap();
        let dedicated = pool.dedicated(CONN).await.unwrap();
        assert!(dedicated.lock().await.is_open());
        assert_eq!(pool.checked_out().len(), 1);
        assert_eq!(server.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_bad_connection_string_releases() {
        let pool = ConnectionPool::new(Arc::new(MemoryServer::new()), Duration::from_secs(5));
        assert!(pool.acquire("not a connection string").await.is_err());
        assert!(pool.checked_out().is_empty());
    }

    struct Stalled;

    #[async_trait]
    impl Connection for Stalled {
        async fn open(&mut self) -> DbResult<()> {
            Ok(())
        }
        fn is_open(&self) -> bool {
            true
        }
        async fn execute(&mut self, _: &Statement, _: &Params) -> DbResult<ExecResult> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ExecResult::default())
        }
        async fn begin(&mut self, _: IsolationLevel) -> DbResult<()> {
            Ok(())
        }
        async fn commit(&mut self) -> DbResult<()> {
            Ok(())
        }
        async fn rollback(&mut self) -> DbResult<()> {
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_statement_timeout() {
        let mut conn = TimedConnection::new(Box::new(Stalled), Duration::from_millis(20));
        let stmt = Statement::Ddl(crate::sql::ddl::DropTable::new("T").into());
        let err = conn.execute(&stmt, &Params::new()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.kind, crate::error::DbErrorKind::Timeout);
    }
}
