//! SQL Server (T-SQL).
//!
//! Bracket quoting, `@name` parameters, `N'...'` for non-ASCII text,
//! `OFFSET ... FETCH` paging behind a mandatory ORDER BY, `IDENTITY(s, i)`,
//! OUTPUT clauses and `GO` between batches.

use super::SqlDialect;
use crate::sql::token::{Token, TokenStream};
use crate::sql::types::ColumnType;

/// Longest NVARCHAR that does not need MAX.
pub const MAX_NVARCHAR: u32 = 4000;

#[derive(Debug, Clone, Copy)]
pub struct TSql;

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn quote_string(&self, s: &str) -> String {
        let body = s.replace('\'', "''");
        // NVARCHAR columns lose non-ASCII text without the N prefix.
        if s.is_ascii() {
            format!("'{}'", body)
        } else {
            format!("N'{}'", body)
        }
    }

    fn format_bool(&self, b: bool) -> &'static str {
        if b {
            "1"
        } else {
            "0"
        }
    }

    fn format_parameter(&self, name: &str) -> String {
        format!("@{}", name)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Offset)
            .space()
            .push(Token::LitInt(offset.unwrap_or(0) as i64))
            .space()
            .push(Token::Rows);
        if let Some(take) = limit {
            ts.space()
                .extend([Token::Fetch, Token::Space, Token::Next, Token::Space])
                .push(Token::LitInt(take as i64))
                .space()
                .extend([Token::Rows, Token::Space, Token::Only]);
        }
        ts
    }

    fn requires_order_by_for_offset(&self) -> bool {
        true
    }

    fn emit_data_type(&self, ty: &ColumnType) -> String {
        match ty {
            ColumnType::Int32 => "INT".into(),
            ColumnType::Int64 => "BIGINT".into(),
            ColumnType::Decimal(p, s) => format!("DECIMAL({}, {})", p, s),
            ColumnType::Boolean => "BIT".into(),
            ColumnType::Guid => "UNIQUEIDENTIFIER".into(),
            ColumnType::DateTime => "DATETIME2".into(),
            ColumnType::Float => "FLOAT".into(),
            ColumnType::VarBinary => "VARBINARY(MAX)".into(),
            ColumnType::Text(Some(n)) if *n <= MAX_NVARCHAR => format!("NVARCHAR({})", n),
            ColumnType::Text(_) => "NVARCHAR(MAX)".into(),
        }
    }

    fn emit_identity(&self, seed: i64, increment: i64) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Raw(format!("IDENTITY({}, {})", seed, increment)));
        ts
    }

    fn supports_if_exists(&self) -> bool {
        true
    }

    fn batch_separator(&self) -> &'static str {
        "GO"
    }

    fn supports_output_clause(&self) -> bool {
        true
    }
}
