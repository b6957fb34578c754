//! Protocol types for worker communication.
//!
//! One JSON object per line in each direction. Requests carry an id that the
//! matching response echoes back.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};
use crate::mapper::row::{Params, Row};
use crate::mapper::value::{duration_to_ticks, parse_datetime, Value};

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Request envelope sent to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation.
    pub id: String,
    /// Method name (e.g., "sql.execute").
    pub method: String,
    /// Method-specific parameters.
    pub params: serde_json::Value,
}

/// Response envelope received from the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to.
    pub id: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Result data (present if success = true).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error information (present if success = false).
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

/// Error information in a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    /// Error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// SQL Server error number, for `SQL_ERROR`.
    #[serde(default)]
    pub number: Option<i32>,
}

/// Method names understood by the worker.
pub mod methods {
    pub const SESSION_OPEN: &str = "session.open";
    pub const SESSION_CLOSE: &str = "session.close";
    pub const SQL_EXECUTE: &str = "sql.execute";
    pub const TX_BEGIN: &str = "tx.begin";
    pub const TX_COMMIT: &str = "tx.commit";
    pub const TX_ROLLBACK: &str = "tx.rollback";
}

// ============================================================================
// Session
// ============================================================================

/// Parameters for `session.open`.
#[derive(Debug, Clone, Serialize)]
pub struct OpenSessionParams {
    pub connection_string: String,
    /// Dedicated sessions get their own physical connection.
    pub dedicated: bool,
}

/// Result of `session.open`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenSessionResponse {
    pub session: String,
}

/// Parameters for methods that only name a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionParams {
    pub session: String,
}

/// Parameters for `tx.begin`.
#[derive(Debug, Clone, Serialize)]
pub struct BeginParams {
    pub session: String,
    /// Isolation level as T-SQL names it.
    pub isolation: String,
}

/// Empty result of session and transaction methods.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ack {}

// ============================================================================
// Execution
// ============================================================================

/// Parameters for `sql.execute`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteParams {
    pub session: String,
    pub sql: String,
    pub args: Vec<NamedArg>,
    pub timeout_secs: u64,
}

/// A named statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedArg {
    /// Parameter name without the `@`.
    pub name: String,
    pub value: WireValue,
}

/// Result of `sql.execute`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<WireValue>>,
    #[serde(default)]
    pub rows_affected: u64,
}

impl ExecuteResponse {
    /// Decode the result rows.
    pub fn into_rows(self) -> DbResult<Vec<Row>> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| {
                if values.len() != columns.len() {
                    return Err(DbError::protocol(format!(
                        "row has {} values for {} columns",
                        values.len(),
                        columns.len()
                    )));
                }
                let mut row = Row::new();
                for (name, value) in columns.iter().zip(values) {
                    row.push(name.clone(), value.into_value()?);
                }
                Ok(row)
            })
            .collect()
    }
}

/// A value as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WireValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    /// Decimal as its canonical string.
    Decimal(String),
    Float(f64),
    Text(String),
    Guid(String),
    /// ISO 8601 without offset.
    DateTime(String),
    /// Base64.
    Bytes(String),
}

impl From<&Value> for WireValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => WireValue::Null,
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Int32(n) => WireValue::Int32(*n),
            Value::Int64(n) => WireValue::Int64(*n),
            Value::Decimal(d) => WireValue::Decimal(d.to_string()),
            Value::Float(f) => WireValue::Float(*f),
            Value::Text(s) => WireValue::Text(s.clone()),
            Value::Guid(g) => WireValue::Guid(g.to_string()),
            Value::DateTime(dt) => WireValue::DateTime(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Value::Bytes(b) => WireValue::Bytes(BASE64.encode(b)),
            Value::Duration(d) => WireValue::Int64(duration_to_ticks(*d)),
            Value::Json(j) => WireValue::Text(j.to_string()),
        }
    }
}

impl WireValue {
    pub fn into_value(self) -> DbResult<Value> {
        let bad = |what: &str, raw: &str| DbError::protocol(format!("malformed {} value: {}", what, raw));
        Ok(match self {
            WireValue::Null => Value::Null,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int32(n) => Value::Int32(n),
            WireValue::Int64(n) => Value::Int64(n),
            WireValue::Decimal(s) => Value::Decimal(s.parse().map_err(|_| bad("decimal", &s))?),
            WireValue::Float(f) => Value::Float(f),
            WireValue::Text(s) => Value::Text(s),
            WireValue::Guid(s) => Value::Guid(s.parse().map_err(|_| bad("guid", &s))?),
            WireValue::DateTime(s) => {
                Value::DateTime(parse_datetime(&s).ok_or_else(|| bad("datetime", &s))?)
            }
            WireValue::Bytes(s) => Value::Bytes(BASE64.decode(&s).map_err(|_| bad("bytes", &s))?),
        })
    }
}

/// Encode statement parameters.
pub fn encode_args(params: &Params) -> Vec<NamedArg> {
    params
        .iter()
        .map(|(name, value)| NamedArg {
            name: name.trim_start_matches('@').to_string(),
            value: value.into(),
        })
        .collect()
}
