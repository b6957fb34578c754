//! Transaction scopes spanning several providers.
//!
//! A [`TransactionScope`] opens one dedicated connection, begins a
//! serializable transaction on it and pins it into every participating
//! provider. Operations of those providers then join the scope's transaction
//! instead of beginning their own. Only providers that reach the same
//! physical database can share a scope.

use tracing::{info, warn};

use super::connection::IsolationLevel;
use super::facade::DataProvider;
use super::pool::{close_later, SharedConnection};
use crate::error::{Error, Result};

const SCOPE: &str = "TransactionScope";

/// An explicit transaction over one or more providers.
#[must_use = "a scope rolls back unless committed"]
pub struct TransactionScope {
    connection: SharedConnection,
    providers: Vec<DataProvider>,
    finished: bool,
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("providers", &self.providers.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl TransactionScope {
    /// Begin a scope over `providers`.
    pub async fn begin(providers: &[&DataProvider]) -> Result<Self> {
        let first = providers
            .first()
            .ok_or_else(|| Error::Internal("a transaction scope needs a provider".into()))?;
        let target = first.connection_info().catalog_key();
        for p in providers {
            if p.connection_info().catalog_key() != target {
                return Err(Error::Internal(format!(
                    "providers on {:?} and {:?} cannot share a transaction",
                    target,
                    p.connection_info().catalog_key()
                )));
            }
            if p.in_scope() {
                return Err(Error::Internal(
                    "provider is already part of a transaction scope".into(),
                ));
            }
        }

        let connection = first
            .pool()
            .dedicated(&first.options().connection_string)
            .await
            .map_err(|e| Error::operation("BeginTransaction", SCOPE, e))?;
        let begun = connection.lock().await.begin(IsolationLevel::Serializable).await;
        if let Err(e) = begun {
            close_later(connection);
            return Err(Error::operation("BeginTransaction", SCOPE, e));
        }

        for p in providers {
            p.set_dedicated(Some(connection.clone()));
        }
        info!(
            providers = providers.len(),
            database = %first.connection_info().database,
            "transaction scope started"
        );
        Ok(Self {
            connection,
            providers: providers.iter().map(|p| (*p).clone()).collect(),
            finished: false,
        })
    }

    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.release();
        let result = {
            let mut conn = self.connection.lock().await;
            let result = conn.commit().await;
            if let Err(e) = conn.close().await {
                warn!(error = %e, "closing scope connection failed");
            }
            result
        };
        result.map_err(|e| Error::operation("Commit", SCOPE, e))?;
        info!("transaction scope committed");
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.release();
        let result = {
            let mut conn = self.connection.lock().await;
            let result = conn.rollback().await;
            if let Err(e) = conn.close().await {
                warn!(error = %e, "closing scope connection failed");
            }
            result
        };
        result.map_err(|e| Error::operation("Rollback", SCOPE, e))?;
        info!("transaction scope rolled back");
        Ok(())
    }

    fn release(&self) {
        for p in &self.providers {
            p.set_dedicated(None);
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("transaction scope dropped without commit; rolling back");
        self.release();
        // Closing a connection with an open transaction rolls it back.
        close_later(self.connection.clone());
    }
}
