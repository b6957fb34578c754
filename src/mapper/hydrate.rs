//! Hydration: result rows to records.
//!
//! Column values are coerced to their property's object-side form, language
//! columns are gathered into a language map (blank values skipped) and nested
//! objects are only materialized when the row carries at least one of their
//! prefixed columns. Collections are filled in a second pass from subtable
//! rows, matched to parents by link value.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::record::{Field, Record};
use super::row::Row;
use super::value::{ticks_to_duration, Value};
use crate::error::{Error, Result};
use crate::metadata::descriptor::ValueType;
use crate::schema::model::{ColumnRole, TableSchema};
use crate::sql::types::ColumnType;

/// Convert a stored column value to the object-side value of a property.
pub fn from_storage(value: &Value, value_type: &ValueType, column: &str) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let fail = || {
        Error::mapping(
            column,
            format!("cannot read {} as {}", value.type_name(), value_type.runtime_name()),
        )
    };

    Ok(match value_type {
        ValueType::Int32 => Value::Int32(match value {
            Value::Text(s) => s.trim().parse().map_err(|_| fail())?,
            other => other.as_i32().ok_or_else(fail)?,
        }),
        ValueType::Int64 => Value::Int64(match value {
            Value::Text(s) => s.trim().parse().map_err(|_| fail())?,
            other => other.as_i64().ok_or_else(fail)?,
        }),
        ValueType::Decimal { .. } => Value::Decimal(value.as_decimal().ok_or_else(fail)?),
        ValueType::Float => Value::Float(match value {
            Value::Text(s) => s.trim().parse().map_err(|_| fail())?,
            other => other.as_f64().ok_or_else(fail)?,
        }),
        ValueType::Boolean => Value::Bool(value.as_bool_lenient().ok_or_else(fail)?),
        ValueType::Guid => value
            .coerce_to(&ColumnType::Guid)
            .ok_or_else(fail)?,
        ValueType::DateTime => value
            .coerce_to(&ColumnType::DateTime)
            .ok_or_else(fail)?,
        ValueType::Duration => match value {
            Value::Duration(d) => Value::Duration(*d),
            Value::Text(s) => Value::Duration(ticks_to_duration(
                s.trim().parse().map_err(|_| fail())?,
            )),
            other => Value::Duration(ticks_to_duration(other.as_i64().ok_or_else(fail)?)),
        },
        ValueType::Text => Value::Text(value.to_text().ok_or_else(fail)?),
        ValueType::Bytes => match value {
            Value::Bytes(b) => Value::Bytes(b.clone()),
            _ => return Err(fail()),
        },
        ValueType::Serialized => match value {
            Value::Bytes(b) => Value::Json(serde_json::from_slice(b).map_err(|e| {
                Error::mapping(column, format!("stored blob is not valid JSON: {}", e))
            })?),
            Value::Text(s) => Value::Json(
                serde_json::from_str(s)
                    .map_err(|e| Error::mapping(column, format!("invalid JSON: {}", e)))?,
            ),
            Value::Json(j) => Value::Json(j.clone()),
            _ => return Err(fail()),
        },
        ValueType::Enum { variants } => enum_from_storage(value, variants).ok_or_else(fail)?,
        ValueType::Model(_) | ValueType::Opaque(_) => return Err(fail()),
    })
}

/// Enum values read back by ordinal, falling back to parsing a variant name.
fn enum_from_storage(value: &Value, variants: &[String]) -> Option<Value> {
    if variants.is_empty() {
        return value.as_i32().map(Value::Int32);
    }
    if let Some(n) = value.as_i64() {
        return usize::try_from(n)
            .ok()
            .and_then(|i| variants.get(i))
            .map(|v| Value::Text(v.clone()));
    }
    let text = value.as_str()?.trim();
    if let Ok(n) = text.parse::<usize>() {
        return variants.get(n).map(|v| Value::Text(v.clone()));
    }
    variants
        .iter()
        .find(|v| v.eq_ignore_ascii_case(text))
        .map(|v| Value::Text(v.clone()))
}

/// Build a record from one row of a table's (or a read shape's) columns.
///
/// Collections are left empty; see [`assign_children`].
pub fn hydrate_row(shape: &TableSchema, row: &Row) -> Result<Record> {
    let mut record = Record::new(&shape.type_key);

    // Groups are listed outer before inner, so parents exist before children.
    for group in &shape.nested {
        if row.has_prefix(&group.prefix) {
            record.set_at(
                &group.path,
                Field::Nested(Some(Box::new(Record::new(&group.type_key)))),
            );
        }
    }

    for column in &shape.columns {
        let Some(stored) = row.get(&column.name) else {
            continue;
        };
        match &column.role {
            ColumnRole::Property { path, value_type } => {
                let value = from_storage(stored, value_type, &column.name)?;
                record.set_at(path, Field::Value(value));
            }
            ColumnRole::Language { path, language } => {
                if !matches!(record.field_at(path), Some(Field::Languages(_))) {
                    record.set_at(path, Field::Languages(BTreeMap::new()));
                }
                if let (Some(Field::Languages(map)), Some(text)) =
                    (record.field_at_mut(path), stored.to_text())
                {
                    if !text.trim().is_empty() {
                        map.insert(language.clone(), text);
                    }
                }
            }
            _ => {}
        }
    }

    for computed in &shape.computed {
        if let Some(stored) = row.get(&computed.name) {
            let value = from_storage(stored, &computed.value_type, &computed.name)?;
            record.set_at(&computed.path, Field::Value(value));
        }
    }

    // An optional nested object with nothing in it reads back as absent.
    for group in shape.nested.iter().rev() {
        if !group.nullable {
            continue;
        }
        let blank = matches!(record.field_at(&group.path), Some(Field::Nested(Some(r))) if r.is_blank());
        if blank {
            record.set_at(&group.path, Field::Nested(None));
        }
    }

    for sub in &shape.subtables {
        record
            .fields
            .insert(sub.property.clone(), Field::Collection(vec![]));
    }

    Ok(record)
}

/// Attach hydrated subtable records to their parents.
///
/// `parent_links` holds each parent's link value, index-aligned with
/// `parents`; `children` pairs each child with the link value it carries.
/// Children keep their order; children matching no parent are dropped.
pub fn assign_children(
    parents: &mut [Record],
    parent_links: &[Value],
    property: &str,
    children: Vec<(Value, Record)>,
) {
    for parent in parents.iter_mut() {
        if !matches!(parent.fields.get(property), Some(Field::Collection(_))) {
            parent
                .fields
                .insert(property.to_string(), Field::Collection(vec![]));
        }
    }
    for (link, child) in children {
        let target = parent_links
            .iter()
            .position(|p| p.sql_cmp(&link) == Some(Ordering::Equal));
        if let Some(i) = target {
            parents[i].push_item(property, child);
        }
    }
}
