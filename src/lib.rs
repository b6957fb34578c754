//! # relmap
//!
//! A metadata-driven object-relational engine for SQL Server.
//!
//! ## Architecture
//!
//! Model types are described once, as metadata. Everything else is derived
//! from that description:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Model metadata (types, properties, keys)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [schema builder]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Desired tables (columns, indexes, FKs, subtables)     │
//! └─────────────────────────────────────────────────────────┘
//!            │                               │
//!            ▼ [migrator + introspector]     ▼ [statement generator]
//! ┌────────────────────────┐   ┌────────────────────────────┐
//! │ DDL converging the     │   │ CRUD, paged queries,       │
//! │ live catalog           │   │ procedures (T-SQL)         │
//! └────────────────────────┘   └────────────────────────────┘
//!                          │
//!                          ▼ [data provider + mapper]
//! ┌─────────────────────────────────────────────────────────┐
//! │       Records in, records out, over pooled connections  │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod introspect;
pub mod mapper;
pub mod metadata;
pub mod migrate;
pub mod provider;
pub mod schema;
pub mod sql;
pub mod statement;

pub use error::{AddOutcome, ConfigError, DbError, Error, Result, UpdateOutcome};
pub use mapper::{Field, Record, Value};
pub use provider::{DataProvider, Page, ProviderOptions, TransactionScope};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::error::{AddOutcome, Error, Result, UpdateOutcome};
    pub use crate::mapper::{Field, Record, Value};
    pub use crate::metadata::{
        Inspector, ModelType, PropertyDescriptor, PropertyKind, StaticSource, TypeRegistry,
        ValueType,
    };
    pub use crate::provider::{
        DataProvider, MemoryServer, Page, ProviderOptions, TransactionScope, WorkerFactory,
    };
    pub use crate::schema::LanguageSet;
    pub use crate::statement::{Filter, FilterOp, JoinSpec, QuerySpec};
}
