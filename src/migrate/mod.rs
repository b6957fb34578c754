//! Schema Migrator: diffs desired tables against live ones and plans the
//! statements that converge them.

pub mod diff;
pub mod plan;

pub use diff::{AlteredColumn, TableDiff};
pub use plan::{probe_rows, MigrationPlan, TableState};
