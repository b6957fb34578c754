//! Data Provider: connections, pooling and the persistence facade.
//!
//! - [`connection`]: the [`Connection`] seam every backend implements
//! - [`worker`]: SQL Server through an out-of-process worker
//! - [`memory`]: an in-process stand-in used by tests and dry runs
//! - [`pool`]: shared connections with statement timeouts
//! - [`facade`]: [`DataProvider`], the public surface
//! - [`transaction`]: scopes spanning several providers

pub mod connection;
pub mod facade;
pub mod memory;
pub mod pool;
pub mod transaction;
pub mod transfer;
pub mod translate;
pub mod worker;

pub use connection::{Connection, ConnectionFactory, ExecResult, IsolationLevel, Statement};
pub use facade::{DataProvider, DataProviderBuilder, Page, ProviderOptions};
pub use memory::MemoryServer;
pub use pool::{ConnectionPool, PooledConnection, SharedConnection};
pub use transaction::TransactionScope;
pub use transfer::ImportReport;
pub use translate::{TranslationReport, Translator};
pub use worker::WorkerFactory;
