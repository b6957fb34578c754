//! Error tiers and typed operation outcomes.
//!
//! Configuration and metadata problems surface as [`ConfigError`] before any
//! statement runs. Expected constraint outcomes (duplicate key, referential
//! integrity on delete, zero-row update) are not errors at all: they come back
//! as [`AddOutcome`], [`UpdateOutcome`] or `false`. Every other database error
//! is wrapped in [`Error::Operation`] with the operation and type that failed.

use std::fmt;

use thiserror::Error;

use crate::config::{ConnectionError, SettingsError};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for a single database round trip.
pub type DbResult<T> = std::result::Result<T, DbError>;

/// SQL Server: violation of PRIMARY KEY or UNIQUE constraint.
pub const ERR_UNIQUE_CONSTRAINT: i32 = 2627;
/// SQL Server: duplicate key row in a unique index.
pub const ERR_UNIQUE_INDEX: i32 = 2601;
/// SQL Server: statement conflicted with a FOREIGN KEY/REFERENCE constraint.
pub const ERR_FOREIGN_KEY: i32 = 547;
/// SQL Server: transaction was chosen as deadlock victim.
pub const ERR_DEADLOCK: i32 = 1205;
/// SQL Server: invalid object name.
pub const ERR_INVALID_OBJECT: i32 = 208;
/// SQL Server: invalid column name.
pub const ERR_INVALID_COLUMN: i32 = 207;
/// SQL Server: object already exists.
pub const ERR_OBJECT_EXISTS: i32 = 2714;
/// SQL Server: cannot insert NULL into a NOT NULL column.
pub const ERR_NULL_INSERT: i32 = 515;

/// Configuration and metadata errors. Always fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("type {type_name} has no primary key property")]
    MissingPrimaryKey { type_name: String },

    #[error("text property {type_name}.{property} has no max length")]
    MissingMaxLength { type_name: String, property: String },

    #[error("unsupported property type {runtime_type} on {type_name}.{property}")]
    UnsupportedPropertyType {
        type_name: String,
        property: String,
        runtime_type: String,
    },

    #[error(
        "column {table}.{column} is NOT NULL and the table has rows, but no migration default is declared"
    )]
    MissingMigrationDefault { table: String, column: String },

    #[error("invalid identity on {type_name}.{property}: {reason}")]
    InvalidIdentity {
        type_name: String,
        property: String,
        reason: String,
    },

    #[error("the language set is empty")]
    EmptyLanguageSet,

    #[error("unknown model type: {0}")]
    UnknownType(String),

    #[error("unknown field {field} on {type_name}")]
    UnknownField { type_name: String, field: String },

    #[error("subtable {table} needs an identity or a single-column primary key on its parent")]
    SubtableNeedsKey { table: String },

    #[error("table {table} has nested subtables, which stored procedures cannot carry")]
    ProceduresUnsupported { table: String },

    #[error("derived type {module}/{type_name} is not registered")]
    UnresolvedDerivedType { module: String, type_name: String },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
}

impl ConfigError {
    pub fn missing_max_length(type_name: impl Into<String>, property: impl Into<String>) -> Self {
        ConfigError::MissingMaxLength {
            type_name: type_name.into(),
            property: property.into(),
        }
    }

    pub fn unsupported(
        type_name: impl Into<String>,
        property: impl Into<String>,
        runtime_type: impl Into<String>,
    ) -> Self {
        ConfigError::UnsupportedPropertyType {
            type_name: type_name.into(),
            property: property.into(),
            runtime_type: runtime_type.into(),
        }
    }

    pub fn invalid_identity(
        type_name: impl Into<String>,
        property: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidIdentity {
            type_name: type_name.into(),
            property: property.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        ConfigError::UnknownField {
            type_name: type_name.into(),
            field: field.into(),
        }
    }
}

/// Category of a database failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// Error raised by the server, usually with an error number.
    Native,
    /// Statement exceeded its timeout.
    Timeout,
    /// Connection could not be opened or was lost.
    Connection,
    /// Malformed exchange with the driver or worker.
    Protocol,
}

/// A native database error.
#[derive(Debug, Clone, PartialEq)]
pub struct DbError {
    pub number: Option<i32>,
    pub message: String,
    pub kind: DbErrorKind,
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(n) => write!(f, "Msg {}: {}", n, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for DbError {}

impl DbError {
    /// Server error with a native error number.
    pub fn native(number: i32, message: impl Into<String>) -> Self {
        Self {
            number: Some(number),
            message: message.into(),
            kind: DbErrorKind::Native,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            number: None,
            message: message.into(),
            kind: DbErrorKind::Timeout,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            number: None,
            message: message.into(),
            kind: DbErrorKind::Connection,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            number: None,
            message: message.into(),
            kind: DbErrorKind::Protocol,
        }
    }

    /// Duplicate key on a primary key, unique constraint or unique index.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self.number, Some(ERR_UNIQUE_CONSTRAINT) | Some(ERR_UNIQUE_INDEX))
    }

    /// Referential integrity violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        self.number == Some(ERR_FOREIGN_KEY)
    }

    /// Failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, DbErrorKind::Timeout | DbErrorKind::Connection)
            || self.number == Some(ERR_DEADLOCK)
    }
}

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration or metadata error (raised before any statement runs).
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A database error during an operation on a model type.
    #[error("{operation} failed for {type_name}: {source}")]
    Operation {
        operation: String,
        type_name: String,
        #[source]
        source: DbError,
    },

    /// A uniqueness invariant no longer holds.
    #[error("internal error: {0}")]
    Internal(String),

    /// A value could not be converted between its column and property forms.
    #[error("cannot map column {column}: {reason}")]
    Mapping { column: String, reason: String },

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("invalid connection string: {0}")]
    Connection(#[from] ConnectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap a database error with operation context.
    pub fn operation(
        operation: impl Into<String>,
        type_name: impl Into<String>,
        source: DbError,
    ) -> Self {
        Error::Operation {
            operation: operation.into(),
            type_name: type_name.into(),
            source,
        }
    }

    /// Row-count invariant violation.
    pub fn too_many_rows(operation: &str, type_name: &str, rows: u64) -> Self {
        Error::Internal(format!(
            "{} on {} affected {} rows where at most one is possible",
            operation, type_name, rows
        ))
    }

    pub fn mapping(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Mapping {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Native database error, if this wraps one.
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            Error::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Outcome of an Add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Row written; carries the assigned identity when the type has one.
    Added { identity: Option<i32> },
    /// A row with the same key already exists.
    AlreadyExists,
}

impl AddOutcome {
    pub fn is_added(&self) -> bool {
        matches!(self, AddOutcome::Added { .. })
    }

    pub fn identity(&self) -> Option<i32> {
        match self {
            AddOutcome::Added { identity } => *identity,
            AddOutcome::AlreadyExists => None,
        }
    }
}

/// Outcome of an Update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// No row matched the original key: it was deleted concurrently.
    RecordDeleted,
    /// The key was changed to one another row already holds.
    NewKeyExists,
}
