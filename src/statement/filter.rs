//! Filter trees.
//!
//! Leaves compare one field against a value; `And`/`Or` combine them.
//! Values are always bound as parameters (`@f0`, `@f1`, ...).
//!
//! NULL handling is deliberately asymmetric. NULL sorts as the smallest value
//! and negated predicates include NULL rows:
//!
//! | operator | value | NULL value |
//! |---|---|---|
//! | equal | `c = @p` | `c IS NULL` |
//! | not equal | `(c <> @p OR c IS NULL)` | `c IS NOT NULL` |
//! | less (or equal) | `(c < @p OR c IS NULL)` | never |
//! | greater (or equal) | `(c > @p AND c IS NOT NULL)` | never |
//! | pattern | `c LIKE @p ESCAPE '\'` | never |
//! | negated pattern | `(c NOT LIKE @p ESCAPE '\' OR c IS NULL)` | never |

use serde::{Deserialize, Serialize};

use super::select::ColumnMap;
use crate::error::{ConfigError, Result};
use crate::mapper::row::Params;
use crate::mapper::value::Value;
use crate::sql::expr::{and_all, never, or_all, param, Expr, ExprExt};

/// Escape character of generated LIKE patterns.
pub const LIKE_ESCAPE: char = '\\';

/// Comparison operator of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    StartsWith,
    EndsWith,
    Contains,
    NotStartsWith,
    NotEndsWith,
    NotContains,
}

impl FilterOp {
    fn pattern(&self, escaped: &str) -> Option<String> {
        match self {
            FilterOp::StartsWith | FilterOp::NotStartsWith => Some(format!("{}%", escaped)),
            FilterOp::EndsWith | FilterOp::NotEndsWith => Some(format!("%{}", escaped)),
            FilterOp::Contains | FilterOp::NotContains => Some(format!("%{}%", escaped)),
            _ => None,
        }
    }

    fn is_negated_pattern(&self) -> bool {
        matches!(
            self,
            FilterOp::NotStartsWith | FilterOp::NotEndsWith | FilterOp::NotContains
        )
    }
}

/// A filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Leaf {
        field: String,
        op: FilterOp,
        value: Value,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn leaf(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Filter::Leaf {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, FilterOp::Equal, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, FilterOp::NotEqual, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, FilterOp::LessThan, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, FilterOp::GreaterThan, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(field, FilterOp::Contains, value)
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut items) => {
                items.push(other);
                Filter::And(items)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut items) => {
                items.push(other);
                Filter::Or(items)
            }
            first => Filter::Or(vec![first, other]),
        }
    }
}

/// Escape LIKE wildcards and brackets so the text matches literally.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_' | '[') {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Compiles filter trees against a column map, binding values as it goes.
pub struct FilterCompiler<'a> {
    columns: &'a ColumnMap,
    type_name: &'a str,
    params: &'a mut Params,
    next: usize,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(columns: &'a ColumnMap, type_name: &'a str, params: &'a mut Params) -> Self {
        Self {
            columns,
            type_name,
            params,
            next: 0,
        }
    }

    /// Predicate for a filter; `None` when it holds for every row.
    pub fn compile(&mut self, filter: &Filter) -> Result<Option<Expr>> {
        match filter {
            Filter::Leaf { field, op, value } => self.leaf(field, *op, value).map(Some),
            Filter::And(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(e) = self.compile(item)? {
                        parts.push(e);
                    }
                }
                Ok(and_all(parts))
            }
            Filter::Or(items) => {
                if items.is_empty() {
                    return Ok(Some(never()));
                }
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    match self.compile(item)? {
                        Some(e) => parts.push(e),
                        None => return Ok(None),
                    }
                }
                Ok(or_all(parts).map(ExprExt::paren))
            }
        }
    }

    fn bind(&mut self, value: Value) -> Expr {
        let name = format!("f{}", self.next);
        self.next += 1;
        self.params.bind(name.clone(), value);
        param(&name)
    }

    fn leaf(&mut self, field: &str, op: FilterOp, value: &Value) -> Result<Expr> {
        let (column, column_type) = self
            .columns
            .resolve(field)
            .ok_or_else(|| ConfigError::unknown_field(self.type_name, field))?;
        let column = column.clone();

        if value.is_null() {
            return Ok(match op {
                FilterOp::Equal => column.is_null(),
                FilterOp::NotEqual => column.is_not_null(),
                _ => never(),
            });
        }

        if let Some(pattern) = op.pattern(&escape_like(&value.to_text().unwrap_or_default())) {
            let p = self.bind(Value::Text(pattern));
            return Ok(if op.is_negated_pattern() {
                column
                    .clone()
                    .not_like_escape(p, LIKE_ESCAPE)
                    .or(column.is_null())
                    .paren()
            } else {
                column.like_escape(p, LIKE_ESCAPE)
            });
        }

        let stored = value.coerce_to(&column_type).unwrap_or_else(|| value.clone());
        let p = self.bind(stored);
        Ok(match op {
            FilterOp::Equal => column.eq(p),
            FilterOp::NotEqual => column.clone().ne(p).or(column.is_null()).paren(),
            FilterOp::LessThan => column.clone().lt(p).or(column.is_null()).paren(),
            FilterOp::LessThanOrEqual => column.clone().lte(p).or(column.is_null()).paren(),
            FilterOp::GreaterThan => column.clone().gt(p).and(column.is_not_null()).paren(),
            FilterOp::GreaterThanOrEqual => {
                column.clone().gte(p).and(column.is_not_null()).paren()
            }
            _ => never(),
        })
    }
}
