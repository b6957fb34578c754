//! Object Mapper: values, records, rows, hydration and dehydration.

pub mod dehydrate;
pub mod hydrate;
pub mod record;
pub mod row;
pub mod value;

pub use dehydrate::{bind_columns, check_fields, column_value, to_storage};
pub use hydrate::{assign_children, from_storage, hydrate_row};
pub use record::{Field, Record};
pub use row::{param_name, Params, Row};
pub use value::{duration_to_ticks, ticks_to_duration, Value};
