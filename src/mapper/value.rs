//! Scalar values.
//!
//! `Value` carries both sides of the mapping: the column values a connection
//! returns (`Int32`, `Text`, `Bytes`, ...) and the object-side forms some
//! properties take (`Duration`, `Json`, and enums as their variant name in
//! `Text`). Hydration and dehydration convert between the two.

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDateTime, TimeDelta};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::metadata::descriptor::DefaultValue;
use crate::sql::expr::{lit_int, lit_null, lit_str, Expr, Literal};
use crate::sql::types::ColumnType;

/// A scalar value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Decimal(Decimal),
    Float(f64),
    Text(String),
    Guid(Uuid),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
    /// Time span (object side; stored as ticks).
    Duration(TimeDelta),
    /// Structured value (object side; stored as a JSON blob).
    Json(serde_json::Value),
}

/// 100ns ticks per microsecond.
const TICKS_PER_MICRO: i64 = 10;

/// Convert a time span to 100ns ticks.
pub fn duration_to_ticks(d: TimeDelta) -> i64 {
    let micros = d.num_microseconds().unwrap_or(i64::MAX / TICKS_PER_MICRO);
    let sub_micro_nanos = (d - TimeDelta::microseconds(micros))
        .num_nanoseconds()
        .unwrap_or(0);
    micros * TICKS_PER_MICRO + sub_micro_nanos / 100
}

/// Convert 100ns ticks to a time span.
pub fn ticks_to_duration(ticks: i64) -> TimeDelta {
    TimeDelta::microseconds(ticks / TICKS_PER_MICRO)
        + TimeDelta::nanoseconds((ticks % TICKS_PER_MICRO) * 100)
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type name for messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Decimal(_) => "decimal",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Guid(_) => "guid",
            Value::DateTime(_) => "datetime",
            Value::Bytes(_) => "bytes",
            Value::Duration(_) => "duration",
            Value::Json(_) => "json",
        }
    }

    /// Integer view of numeric and boolean values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int32(n) => Some(*n as i64),
            Value::Int64(n) => Some(*n),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|n| i32::try_from(n).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(n) => Some(*n as f64),
            Value::Int64(n) => Some(*n as f64),
            Value::Decimal(d) => d.to_f64(),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int32(n) => Some(Decimal::from(*n)),
            Value::Int64(n) => Some(Decimal::from(*n)),
            Value::Decimal(d) => Some(*d),
            Value::Float(f) => Decimal::from_f64(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Loose boolean reading: numbers are true when non-zero, text is true for
    /// "1", "on", "true" or "yes" in any case.
    pub fn as_bool_lenient(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Text(s) => {
                let s = s.trim().to_lowercase();
                Some(matches!(s.as_str(), "1" | "on" | "true" | "yes"))
            }
            other => other.as_i64().map(|n| n != 0),
        }
    }

    /// Render as text the way a string conversion would.
    pub fn to_text(&self) -> Option<String> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(b) => b.to_string(),
            Value::Int32(n) => n.to_string(),
            Value::Int64(n) => n.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Guid(g) => g.to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            Value::Bytes(_) | Value::Json(_) => return None,
            Value::Duration(d) => duration_to_ticks(*d).to_string(),
        })
    }

    /// Convert to the storage form of a column type.
    ///
    /// Returns `None` when the value cannot be represented.
    pub fn coerce_to(&self, ty: &ColumnType) -> Option<Value> {
        if self.is_null() {
            return Some(Value::Null);
        }
        Some(match ty {
            ColumnType::Int32 => Value::Int32(match self {
                Value::Text(s) => s.trim().parse().ok()?,
                other => other.as_i32()?,
            }),
            ColumnType::Int64 => Value::Int64(match self {
                Value::Text(s) => s.trim().parse().ok()?,
                Value::Duration(d) => duration_to_ticks(*d),
                other => other.as_i64()?,
            }),
            ColumnType::Decimal(_, scale) => {
                let mut d = self.as_decimal()?;
                d = d.round_dp(*scale as u32);
                Value::Decimal(d)
            }
            ColumnType::Boolean => Value::Bool(self.as_bool_lenient()?),
            ColumnType::Guid => Value::Guid(match self {
                Value::Guid(g) => *g,
                Value::Text(s) => Uuid::parse_str(s.trim()).ok()?,
                _ => return None,
            }),
            ColumnType::DateTime => Value::DateTime(match self {
                Value::DateTime(dt) => *dt,
                Value::Text(s) => parse_datetime(s)?,
                _ => return None,
            }),
            ColumnType::Float => Value::Float(match self {
                Value::Text(s) => s.trim().parse().ok()?,
                other => other.as_f64()?,
            }),
            ColumnType::VarBinary => Value::Bytes(match self {
                Value::Bytes(b) => b.clone(),
                Value::Json(j) => serde_json::to_vec(j).ok()?,
                _ => return None,
            }),
            ColumnType::Text(_) => Value::Text(self.to_text()?),
        })
    }

    /// Comparison under SQL semantics: `None` when either side is NULL or the
    /// values are not comparable.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Text(a), Value::Text(b)) => Some(compare_text(a, b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Text(b)) => Uuid::parse_str(b).ok().map(|b| a.cmp(&b)),
            (Value::Text(a), Value::Guid(b)) => Uuid::parse_str(a).ok().map(|a| a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::Text(b)) => parse_datetime(b).map(|b| a.cmp(&b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (a, b) => {
                if let (Some(x), Some(y)) = (a.as_decimal(), b.as_decimal()) {
                    return Some(x.cmp(&y));
                }
                match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => match (a.as_i64(), b.as_i64()) {
                        (Some(x), Some(y)) => Some(x.cmp(&y)),
                        _ => None,
                    },
                }
            }
        }
    }

    /// Literal expression for engine-chosen constants.
    pub fn to_literal(&self) -> Expr {
        match self {
            Value::Null => lit_null(),
            Value::Bool(b) => Expr::Literal(Literal::Bool(*b)),
            Value::Int32(n) => lit_int(*n as i64),
            Value::Int64(n) => lit_int(*n),
            Value::Float(f) => Expr::Literal(Literal::Float(*f)),
            other => match other.to_text() {
                Some(s) => lit_str(&s),
                None => lit_null(),
            },
        }
    }
}

/// Case-insensitive, trailing-space-insensitive text ordering (the default
/// SQL Server collation behavior).
pub fn compare_text(a: &str, b: &str) -> Ordering {
    let a = a.trim_end_matches(' ').to_lowercase();
    let b = b.trim_end_matches(' ').to_lowercase();
    a.cmp(&b)
}

/// Parse the datetime formats the engine writes and common ISO variants.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl From<&DefaultValue> for Value {
    fn from(d: &DefaultValue) -> Self {
        match d {
            DefaultValue::Bool(b) => Value::Bool(*b),
            DefaultValue::Int(n) => Value::Int64(*n),
            DefaultValue::Float(f) => Value::Float(*f),
            DefaultValue::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Json(j) => write!(f, "{}", j),
            other => write!(f, "{}", other.to_text().unwrap_or_default()),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from!(
    bool => Bool,
    i32 => Int32,
    i64 => Int64,
    Decimal => Decimal,
    f64 => Float,
    String => Text,
    Uuid => Guid,
    NaiveDateTime => DateTime,
    Vec<u8> => Bytes,
    TimeDelta => Duration,
    serde_json::Value => Json,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
