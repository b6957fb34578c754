//! SQL generation module.
//!
//! A type-safe SQL builder rendering through a dialect trait:
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`ddl`] - Tables, indexes, table types, procedures and batch scripts
//! - [`dml`] - INSERT, UPDATE, DELETE with OUTPUT
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations
//! - [`types`] - Abstract column types

pub mod ddl;
pub mod dialect;
pub mod dml;
pub mod expr;
pub mod query;
pub mod token;
pub mod types;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types at the sql module level
pub use dialect::{Dialect, SqlDialect};
pub use expr::{
    and_all, col, count_star, lit_int, lit_null, lit_str, never, or_all, param, table_col,
    BinaryOperator, Expr, ExprExt, Literal, UnaryOperator,
};
pub use query::{Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, SortDir, TableRef};
pub use token::{Token, TokenStream};
pub use types::ColumnType;

pub use ddl::{
    AlterAction, AlterTable, ColumnDef, CreateIndex, CreateProcedure, CreateTable,
    CreateTableType, DdlStatement, DefaultConstraint, DropIndex, DropProcedure, DropTable,
    DropType, ParamKind, ProcedureParam, ProcedureStatement, ReferentialAction, Script,
    TableConstraint,
};
pub use dml::{Delete, Insert, InsertSource, Update};
