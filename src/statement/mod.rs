//! Statement Generator.
//!
//! Builds the parameterized statements the provider executes: single-row
//! CRUD, subtable row sets, filtered and paged reads, derived-type reads and
//! the stored procedures installed alongside each table.

pub mod crud;
pub mod derived;
pub mod filter;
pub mod procedure;
pub mod select;

/// How a single row is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Primary key (plus site).
    Key,
    /// Identity column (plus site).
    Identity,
}

pub use crud::{Synthetic, ORIGINAL_PREFIX};
pub use derived::{decode_descriptor, Descriptor};
pub use filter::{Filter, FilterOp};
pub use procedure::ProcedureKind;
pub use select::{plan_select, JoinSpec, QuerySpec, SelectPlan, Sort};
