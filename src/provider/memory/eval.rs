//! Expression evaluation against in-memory rows.
//!
//! Predicates evaluate under three-valued logic: `None` is UNKNOWN, and only
//! `Some(true)` keeps a row.

use std::cmp::Ordering;

use super::table::MemTable;
use crate::error::{DbError, DbResult, ERR_INVALID_COLUMN};
use crate::mapper::row::Params;
use crate::mapper::value::Value;
use crate::sql::expr::{BinaryOperator, Expr, Literal, UnaryOperator};

/// SQL Server: must declare the scalar variable.
pub const ERR_UNDECLARED_VARIABLE: i32 = 137;

/// One table visible to an expression, with its current row. A `None` row is
/// the NULL side of an outer join.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    pub name: &'a str,
    pub table: &'a MemTable,
    pub row: Option<&'a [Value]>,
}

/// Evaluation scope: the visible rows and the bound parameters.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    pub sources: Vec<Source<'a>>,
    pub params: &'a Params,
}

impl<'a> Scope<'a> {
    pub fn new(params: &'a Params) -> Self {
        Self {
            sources: Vec::new(),
            params,
        }
    }

    pub fn with(mut self, source: Source<'a>) -> Self {
        self.sources.push(source);
        self
    }

    fn column(&self, table: Option<&str>, column: &str) -> DbResult<Value> {
        for source in &self.sources {
            if let Some(t) = table {
                if !t.eq_ignore_ascii_case(source.name) {
                    continue;
                }
            }
            if let Some(i) = source.table.column_index(column) {
                return Ok(source.row.map(|r| r[i].clone()).unwrap_or(Value::Null));
            }
        }
        let name = match table {
            Some(t) => format!("{}.{}", t, column),
            None => column.to_string(),
        };
        Err(DbError::native(
            ERR_INVALID_COLUMN,
            format!("Invalid column name '{}'.", name),
        ))
    }

    /// Value of an expression.
    pub fn eval(&self, expr: &Expr) -> DbResult<Value> {
        match expr {
            Expr::Column { table, column } => self.column(table.as_deref(), column),
            Expr::Param(name) => self.params.get(name).cloned().ok_or_else(|| {
                DbError::native(
                    ERR_UNDECLARED_VARIABLE,
                    format!("Must declare the scalar variable \"@{}\".", name),
                )
            }),
            Expr::Literal(lit) => Ok(literal(lit)),
            Expr::BinaryOp {
                left,
                op: op @ (BinaryOperator::Plus | BinaryOperator::Minus),
                right,
            } => arithmetic(*op, &self.eval(left)?, &self.eval(right)?),
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => arithmetic(BinaryOperator::Minus, &Value::Int64(0), &self.eval(expr)?),
            Expr::Function { name, args } => self.function(name, args),
            Expr::Paren(inner) => self.eval(inner),
            Expr::Raw(sql) => self.raw(sql),
            Expr::Star { .. } => Err(DbError::protocol("'*' is not a scalar expression")),
            predicate => Ok(match self.truth(predicate)? {
                Some(b) => Value::Bool(b),
                None => Value::Null,
            }),
        }
    }

    /// Truth of a predicate.
    pub fn truth(&self, expr: &Expr) -> DbResult<Option<bool>> {
        Ok(match expr {
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => match self.truth(left)? {
                    Some(false) => Some(false),
                    l => match (l, self.truth(right)?) {
                        (_, Some(false)) => Some(false),
                        (Some(true), Some(true)) => Some(true),
                        _ => None,
                    },
                },
                BinaryOperator::Or => match self.truth(left)? {
                    Some(true) => Some(true),
                    l => match (l, self.truth(right)?) {
                        (_, Some(true)) => Some(true),
                        (Some(false), Some(false)) => Some(false),
                        _ => None,
                    },
                },
                BinaryOperator::Plus | BinaryOperator::Minus => {
                    self.eval(expr)?.as_bool_lenient()
                }
                cmp => {
                    let ordering = self.eval(left)?.sql_cmp(&self.eval(right)?);
                    ordering.map(|o| compare(*cmp, o))
                }
            },
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => self.truth(expr)?.map(|b| !b),
            Expr::IsNull { expr, negated } => Some(self.eval(expr)?.is_null() != *negated),
            Expr::In {
                expr,
                values,
                negated,
            } => {
                let value = self.eval(expr)?;
                if value.is_null() {
                    return Ok(None);
                }
                let mut unknown = false;
                for candidate in values {
                    match value.sql_cmp(&self.eval(candidate)?) {
                        Some(Ordering::Equal) => return Ok(Some(!negated)),
                        None => unknown = true,
                        _ => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(*negated)
                }
            }
            Expr::LikeEscape {
                expr,
                pattern,
                escape_char,
                negated,
            } => {
                let value = self.eval(expr)?;
                let pattern = self.eval(pattern)?;
                match (value.to_text(), pattern.to_text()) {
                    (Some(v), Some(p)) => Some(like(&v, &p, Some(*escape_char)) != *negated),
                    _ => None,
                }
            }
            Expr::Paren(inner) => self.truth(inner)?,
            other => match self.eval(other)? {
                Value::Null => None,
                v => v.as_bool_lenient(),
            },
        })
    }

    fn function(&self, name: &str, args: &[Expr]) -> DbResult<Value> {
        let values = args
            .iter()
            .map(|a| self.eval(a))
            .collect::<DbResult<Vec<_>>>()?;
        let text = |v: &Value| v.to_text();
        Ok(match name.to_ascii_uppercase().as_str() {
            "COALESCE" | "ISNULL" => values.into_iter().find(|v| !v.is_null()).unwrap_or_default(),
            "UPPER" => values.first().and_then(text).map(|s| s.to_uppercase()).into(),
            "LOWER" => values.first().and_then(text).map(|s| s.to_lowercase()).into(),
            "LEN" => values
                .first()
                .and_then(text)
                .map(|s| s.trim_end_matches(' ').chars().count() as i32)
                .into(),
            other => {
                return Err(DbError::protocol(format!(
                    "function {} is not supported here",
                    other
                )))
            }
        })
    }

    /// Computed-column fragments: a bare or bracketed column name.
    fn raw(&self, sql: &str) -> DbResult<Value> {
        let name = sql
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');
        self.column(None, name)
    }
}

fn compare(op: BinaryOperator, ordering: Ordering) -> bool {
    match op {
        BinaryOperator::Eq => ordering == Ordering::Equal,
        BinaryOperator::Ne => ordering != Ordering::Equal,
        BinaryOperator::Lt => ordering == Ordering::Less,
        BinaryOperator::Lte => ordering != Ordering::Greater,
        BinaryOperator::Gt => ordering == Ordering::Greater,
        BinaryOperator::Gte => ordering != Ordering::Less,
        _ => false,
    }
}

pub fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Int(n) => match i32::try_from(*n) {
            Ok(n) => Value::Int32(n),
            Err(_) => Value::Int64(*n),
        },
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::Text(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

fn arithmetic(op: BinaryOperator, left: &Value, right: &Value) -> DbResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let sign = if op == BinaryOperator::Minus { -1 } else { 1 };
    if let (Value::Text(a), Value::Text(b), 1) = (left, right, sign) {
        return Ok(Value::Text(format!("{}{}", a, b)));
    }
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        if matches!(left, Value::Int32(_) | Value::Int64(_))
            && matches!(right, Value::Int32(_) | Value::Int64(_))
        {
            return Ok(Value::Int64(a + sign * b));
        }
    }
    match (left.as_decimal(), right.as_decimal()) {
        (Some(a), Some(b)) if sign > 0 => Ok(Value::Decimal(a + b)),
        (Some(a), Some(b)) => Ok(Value::Decimal(a - b)),
        _ => Err(DbError::protocol(format!(
            "cannot apply arithmetic to {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Pattern {
    Any,
    One,
    Set { negated: bool, ranges: Vec<(char, char)> },
    Char(char),
}

fn parse_pattern(pattern: &str, escape: Option<char>) -> Vec<Pattern> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if Some(c) == escape && i + 1 < chars.len() {
            out.push(Pattern::Char(chars[i + 1]));
            i += 2;
            continue;
        }
        match c {
            '%' => out.push(Pattern::Any),
            '_' => out.push(Pattern::One),
            '[' => {
                if let Some(end) = chars[i + 1..].iter().position(|&c| c == ']') {
                    let body = &chars[i + 1..i + 1 + end];
                    let (negated, body) = match body.first() {
                        Some('^') => (true, &body[1..]),
                        _ => (false, body),
                    };
                    let mut ranges = Vec::new();
                    let mut j = 0;
                    while j < body.len() {
                        if j + 2 < body.len() && body[j + 1] == '-' {
                            ranges.push((body[j], body[j + 2]));
                            j += 3;
                        } else {
                            ranges.push((body[j], body[j]));
                            j += 1;
                        }
                    }
                    out.push(Pattern::Set { negated, ranges });
                    i += end + 2;
                    continue;
                }
                out.push(Pattern::Char('['));
            }
            other => out.push(Pattern::Char(other)),
        }
        i += 1;
    }
    out
}

/// LIKE matching with `%`, `_`, `[set]` and an optional escape character.
/// Case-insensitive and blind to trailing spaces of the value.
pub fn like(value: &str, pattern: &str, escape: Option<char>) -> bool {
    let value: Vec<char> = value.trim_end_matches(' ').to_lowercase().chars().collect();
    let pattern = parse_pattern(&pattern.to_lowercase(), escape);

    fn matches(v: &[char], p: &[Pattern]) -> bool {
        let Some((head, rest)) = p.split_first() else {
            return v.is_empty();
        };
        match (head, v.split_first()) {
            (Pattern::Any, _) => (0..=v.len()).any(|i| matches(&v[i..], rest)),
            (_, None) => false,
            (Pattern::One, Some((_, tail))) => matches(tail, rest),
            (Pattern::Char(p), Some((c, tail))) => p == c && matches(tail, rest),
            (Pattern::Set { negated, ranges }, Some((c, tail))) => {
                ranges.iter().any(|(lo, hi)| lo <= c && c <= hi) != *negated
                    && matches(tail, rest)
            }
        }
    }

    matches(&value, &pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::ColumnDescriptor;
    use crate::sql::expr::{col, lit_int, never, param, ExprExt};
    use crate::sql::types::ColumnType;

    #[test]
    fn test_like_patterns() {
        assert!(like("hello", "h%o", None));
        assert!(like("Hello", "_ELLO", None));
        assert!(!like("hello", "h_o", None));
        assert!(like("50%", "50\\%", Some('\\')));
        assert!(!like("500", "50\\%", Some('\\')));
        assert!(like("a_b", "a\\_b", Some('\\')));
        assert!(!like("axb", "a\\_b", Some('\\')));
        assert!(like("[x]", "\\[x]", Some('\\')));
        assert!(like("b", "[a-c]", None));
        assert!(!like("b", "[^a-c]", None));
        assert!(like("abc  ", "abc", None));
    }

    fn table() -> MemTable {
        MemTable::new(
            "dbo",
            "T",
            vec![
                ColumnDescriptor::new("A", ColumnType::Int32).nullable().into(),
                ColumnDescriptor::new("B", ColumnType::Text(None)).nullable().into(),
            ],
        )
    }

    #[test]
    fn test_three_valued_logic() {
        let t = table();
        let row = vec![Value::Null, Value::from("x")];
        let params = Params::new().with("p", 1);
        let scope = Scope::new(&params).with(Source {
            name: "T",
            table: &t,
            row: Some(&row),
        });

        assert_eq!(scope.truth(&col("A").eq(param("p"))).unwrap(), None);
        assert_eq!(scope.truth(&col("A").eq(param("p")).not()).unwrap(), None);
        assert_eq!(scope.truth(&col("A").is_null()).unwrap(), Some(true));
        assert_eq!(
            scope.truth(&col("A").eq(param("p")).or(col("B").eq(col("B")))).unwrap(),
            Some(true)
        );
        assert_eq!(
            scope.truth(&col("A").eq(param("p")).and(never())).unwrap(),
            Some(false)
        );
        assert_eq!(
            scope.truth(&col("A").in_list(vec![lit_int(1)])).unwrap(),
            None
        );
    }

    #[test]
    fn test_missing_parameter_and_column() {
        let t = table();
        let params = Params::new();
        let scope = Scope::new(&params).with(Source {
            name: "T",
            table: &t,
            row: None,
        });
        assert_eq!(scope.eval(&param("x")).unwrap_err().number, Some(ERR_UNDECLARED_VARIABLE));
        assert_eq!(scope.eval(&col("Z")).unwrap_err().number, Some(ERR_INVALID_COLUMN));
        assert_eq!(scope.eval(&col("A")).unwrap(), Value::Null);
    }
}
