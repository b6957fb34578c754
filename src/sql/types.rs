//! Abstract column types.
//!
//! `ColumnType` is the dialect-neutral vocabulary the schema builder speaks.
//! Dialects render it for DDL (`SqlDialect::emit_data_type`), and the catalog
//! introspector maps native type names back into it so desired and live
//! schemas compare equal when they describe the same column.
//!
//! # Examples
//!
//! ```ignore
//! use relmap::sql::types::ColumnType;
//!
//! assert_eq!(ColumnType::text(Some(50)), ColumnType::Text(Some(50)));
//! assert_eq!(ColumnType::text(Some(9000)), ColumnType::Text(None));
//! assert_eq!(
//!     ColumnType::from_catalog("nvarchar", 100, 0, 0),
//!     Some(ColumnType::Text(Some(50)))
//! );
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::dialect::MAX_NVARCHAR;

/// Abstract column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 32-bit signed integer.
    Int32,

    /// 64-bit signed integer.
    Int64,

    /// Fixed-precision decimal: precision, scale.
    Decimal(u8, u8),

    /// Boolean flag.
    Boolean,

    /// 128-bit GUID.
    Guid,

    /// Date and time without offset.
    DateTime,

    /// 64-bit floating point.
    Float,

    /// Unbounded binary.
    VarBinary,

    /// Unicode text with an optional maximum length; `None` is unbounded.
    Text(Option<u32>),
}

impl ColumnType {
    /// Text column with the given maximum length.
    ///
    /// Lengths beyond what a bounded NVARCHAR can hold collapse to unbounded,
    /// which is how the catalog reports them.
    pub fn text(max_length: Option<u32>) -> Self {
        match max_length {
            Some(n) if n > 0 && n <= MAX_NVARCHAR => ColumnType::Text(Some(n)),
            _ => ColumnType::Text(None),
        }
    }

    /// Map a catalog type description back to an abstract type.
    ///
    /// `max_length` is the byte length reported by `sys.columns` (`-1` for MAX).
    pub fn from_catalog(type_name: &str, max_length: i32, precision: u8, scale: u8) -> Option<Self> {
        match type_name.to_lowercase().as_str() {
            "int" => Some(ColumnType::Int32),
            "bigint" => Some(ColumnType::Int64),
            "decimal" | "numeric" => Some(ColumnType::Decimal(precision, scale)),
            "bit" => Some(ColumnType::Boolean),
            "uniqueidentifier" => Some(ColumnType::Guid),
            "datetime2" | "datetime" => Some(ColumnType::DateTime),
            "float" => Some(ColumnType::Float),
            "varbinary" | "image" => Some(ColumnType::VarBinary),
            "nvarchar" | "nchar" => {
                if max_length < 0 {
                    Some(ColumnType::Text(None))
                } else {
                    Some(ColumnType::text(Some(max_length as u32 / 2)))
                }
            }
            "varchar" | "char" => {
                if max_length < 0 {
                    Some(ColumnType::Text(None))
                } else {
                    Some(ColumnType::text(Some(max_length as u32)))
                }
            }
            _ => None,
        }
    }

    /// Catalog representation used by `sys.columns`: type name, byte length,
    /// precision, scale.
    pub fn to_catalog(&self) -> (&'static str, i32, u8, u8) {
        match self {
            ColumnType::Int32 => ("int", 4, 10, 0),
            ColumnType::Int64 => ("bigint", 8, 19, 0),
            ColumnType::Decimal(p, s) => ("decimal", 9, *p, *s),
            ColumnType::Boolean => ("bit", 1, 1, 0),
            ColumnType::Guid => ("uniqueidentifier", 16, 0, 0),
            ColumnType::DateTime => ("datetime2", 8, 27, 7),
            ColumnType::Float => ("float", 8, 53, 0),
            ColumnType::VarBinary => ("varbinary", -1, 0, 0),
            ColumnType::Text(Some(n)) => ("nvarchar", (*n as i32) * 2, 0, 0),
            ColumnType::Text(None) => ("nvarchar", -1, 0, 0),
        }
    }

    /// Check if this is a text type.
    pub fn is_text(&self) -> bool {
        matches!(self, ColumnType::Text(_))
    }

    /// Check if this is a numeric type.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Int32 | ColumnType::Int64 | ColumnType::Decimal(_, _) | ColumnType::Float
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int32 => write!(f, "int32"),
            ColumnType::Int64 => write!(f, "int64"),
            ColumnType::Decimal(p, s) => write!(f, "decimal({}, {})", p, s),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Guid => write!(f, "guid"),
            ColumnType::DateTime => write!(f, "datetime"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::VarBinary => write!(f, "varbinary"),
            ColumnType::Text(Some(n)) => write!(f, "text({})", n),
            ColumnType::Text(None) => write!(f, "text"),
        }
    }
}
