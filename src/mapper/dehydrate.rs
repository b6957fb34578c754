//! Dehydration: records to statement parameters.
//!
//! Values are taken from the record along each column's property path and
//! converted to the column's storage form. Parameters are bound in the same
//! column order the statement generator lists the columns in.

use super::record::{Field, Record};
use super::row::{param_name, Params};
use super::value::{duration_to_ticks, Value};
use crate::error::{ConfigError, Error, Result};
use crate::metadata::descriptor::ValueType;
use crate::schema::model::{ColumnDescriptor, ColumnRole, TableSchema};

/// Convert an object-side value to the storage form of a column.
pub fn to_storage(value: &Value, value_type: &ValueType, column: &ColumnDescriptor) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let fail = || {
        Error::mapping(
            &column.name,
            format!(
                "cannot store {} as {}",
                value.type_name(),
                column.column_type
            ),
        )
    };

    match value_type {
        ValueType::Enum { variants } if !variants.is_empty() => match value {
            Value::Text(name) => variants
                .iter()
                .position(|v| v.eq_ignore_ascii_case(name.trim()))
                .map(|i| Value::Int32(i as i32))
                .ok_or_else(|| {
                    Error::mapping(&column.name, format!("unknown variant '{}'", name))
                }),
            other => other.as_i32().map(Value::Int32).ok_or_else(fail),
        },
        ValueType::Duration => match value {
            Value::Duration(d) => Ok(Value::Int64(duration_to_ticks(*d))),
            other => other.as_i64().map(Value::Int64).ok_or_else(fail),
        },
        ValueType::Serialized => match value {
            Value::Bytes(b) => Ok(Value::Bytes(b.clone())),
            Value::Json(j) => Ok(Value::Bytes(serde_json::to_vec(j)?)),
            Value::Text(s) => Ok(Value::Bytes(serde_json::to_vec(s)?)),
            _ => Err(fail()),
        },
        _ => value.coerce_to(&column.column_type).ok_or_else(fail),
    }
}

/// Storage value of one column of a record.
///
/// Synthetic columns (site, link, derived-type descriptors) are not part of
/// the record and come back NULL; the statement generator binds them.
pub fn column_value(record: &Record, column: &ColumnDescriptor) -> Result<Value> {
    match &column.role {
        ColumnRole::Property { path, value_type } => match record.field_at(path) {
            Some(Field::Value(v)) => to_storage(v, value_type, column),
            Some(_) => Err(Error::mapping(&column.name, "field is not a scalar value")),
            None => Ok(Value::Null),
        },
        ColumnRole::Language { path, language } => match record.field_at(path) {
            Some(Field::Languages(map)) => Ok(map
                .iter()
                .find(|(lang, _)| lang.eq_ignore_ascii_case(language))
                .map(|(_, text)| text.clone())
                .filter(|text| !text.trim().is_empty())
                .map(Value::Text)
                .unwrap_or(Value::Null)),
            Some(Field::Value(Value::Null)) | None => Ok(Value::Null),
            Some(_) => Err(Error::mapping(&column.name, "field is not a language map")),
        },
        _ => Ok(Value::Null),
    }
}

/// Bind the given columns of a record as parameters named after the columns.
pub fn bind_columns<'c>(
    record: &Record,
    columns: impl IntoIterator<Item = &'c ColumnDescriptor>,
    params: &mut Params,
) -> Result<()> {
    for column in columns {
        let value = column_value(record, column)?;
        params.bind(param_name(&column.name), value);
    }
    Ok(())
}

/// Reject record fields the shape has no place for.
pub fn check_fields(shape: &TableSchema, record: &Record) -> Result<()> {
    let known = |name: &str| {
        shape
            .columns
            .iter()
            .filter_map(ColumnDescriptor::path)
            .any(|p| p.first().map(String::as_str) == Some(name))
            || shape.nested.iter().any(|g| g.path[0] == name)
            || shape.computed.iter().any(|c| c.path[0] == name)
            || shape.subtables.iter().any(|s| s.property == name)
    };
    for name in record.fields.keys() {
        if !known(name) {
            return Err(ConfigError::unknown_field(&shape.type_key, name).into());
        }
    }
    for sub in &shape.subtables {
        for item in record.collection(&sub.property) {
            check_fields(&sub.table, item)?;
        }
    }
    Ok(())
}
