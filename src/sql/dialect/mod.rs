//! SQL dialect rules.
//!
//! Statements are built as dialect-neutral token streams and rendered
//! through [`SqlDialect`]. Quoting, paging, type names, identity columns,
//! parameter markers and batch separators are the dialect's business. The
//! only dialect is T-SQL, which is also what the catalog introspector reads.
//!
//! ```ignore
//! use relmap::sql::dialect::{Dialect, SqlDialect};
//!
//! assert_eq!(Dialect::TSql.quote_identifier("Order"), "[Order]");
//! ```

mod tsql;

pub use tsql::{TSql, MAX_NVARCHAR};

use super::token::TokenStream;
use super::types::ColumnType;

/// How generated SQL is spelled for one database engine.
pub trait SqlDialect: std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn quote_identifier(&self, ident: &str) -> String;

    fn quote_string(&self, s: &str) -> String;

    fn format_bool(&self, b: bool) -> &'static str;

    /// Render a named statement parameter.
    fn format_parameter(&self, name: &str) -> String;

    /// Paging clause placed after ORDER BY.
    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream;

    /// Whether paging is only legal after an ORDER BY.
    fn requires_order_by_for_offset(&self) -> bool;

    fn emit_data_type(&self, ty: &ColumnType) -> String;

    /// Identity column clause with the given seed and increment.
    fn emit_identity(&self, seed: i64, increment: i64) -> TokenStream;

    /// Whether `DROP ... IF EXISTS` is available.
    fn supports_if_exists(&self) -> bool;

    /// Line-only separator between script batches.
    fn batch_separator(&self) -> &'static str;

    /// Whether INSERT/UPDATE/DELETE can return rows through OUTPUT.
    fn supports_output_clause(&self) -> bool;
}

/// Dialect selector carried by statements and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    TSql,
}

impl Dialect {
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::TSql => &TSql,
        }
    }
}

impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn format_parameter(&self, name: &str) -> String {
        self.dialect().format_parameter(name)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        self.dialect().emit_limit_offset(limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        self.dialect().requires_order_by_for_offset()
    }

    fn emit_data_type(&self, ty: &ColumnType) -> String {
        self.dialect().emit_data_type(ty)
    }

    fn emit_identity(&self, seed: i64, increment: i64) -> TokenStream {
        self.dialect().emit_identity(seed, increment)
    }

    fn supports_if_exists(&self) -> bool {
        self.dialect().supports_if_exists()
    }

    fn batch_separator(&self) -> &'static str {
        self.dialect().batch_separator()
    }

    fn supports_output_clause(&self) -> bool {
        self.dialect().supports_output_clause()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_tsql() {
        assert_eq!(Dialect::default(), Dialect::TSql);
        assert_eq!(Dialect::TSql.to_string(), "tsql");
    }

    #[test]
    fn test_column_types() {
        let d = Dialect::TSql;
        assert_eq!(d.emit_data_type(&ColumnType::Int32), "INT");
        assert_eq!(d.emit_data_type(&ColumnType::Int64), "BIGINT");
        assert_eq!(d.emit_data_type(&ColumnType::Text(Some(50))), "NVARCHAR(50)");
        assert_eq!(d.emit_data_type(&ColumnType::Text(None)), "NVARCHAR(MAX)");
        assert_eq!(d.emit_data_type(&ColumnType::Text(Some(8000))), "NVARCHAR(MAX)");
        assert_eq!(d.emit_data_type(&ColumnType::Decimal(18, 4)), "DECIMAL(18, 4)");
        assert_eq!(d.emit_data_type(&ColumnType::Guid), "UNIQUEIDENTIFIER");
        assert_eq!(d.emit_data_type(&ColumnType::VarBinary), "VARBINARY(MAX)");
    }
}
