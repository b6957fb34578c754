//! Result rows and statement parameters.

use super::value::Value;

/// One result row: column names with their values, in select order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut row = Row::new();
        for (name, value) in pairs {
            row.push(name, value);
        }
        row
    }

    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.columns.push(column.into());
        self.values.push(value);
    }

    /// Value of a column; names compare case-insensitively.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.position(column).map(|i| &self.values[i])
    }

    /// Value of a column, NULL when the column is absent.
    pub fn value(&self, column: &str) -> Value {
        self.get(column).cloned().unwrap_or(Value::Null)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.position(column).is_some()
    }

    /// Whether any column name starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        let prefix = prefix.to_lowercase();
        self.columns
            .iter()
            .any(|c| c.to_lowercase().starts_with(&prefix))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Named statement parameters, in binding order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    entries: Vec<(String, Value)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value, replacing an existing binding of the same name.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    /// Builder form of [`Params::bind`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bind(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append every binding of `other`.
    pub fn merge(&mut self, other: Params) {
        for (name, value) in other.entries {
            self.bind(name, value);
        }
    }
}

/// Parameter name for a column: identifier characters kept, others mapped to `_`.
pub fn param_name(column: &str) -> String {
    column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_ignores_case() {
        let row = Row::from_pairs([("Id".to_string(), Value::Int32(1))]);
        assert_eq!(row.get("ID"), Some(&Value::Int32(1)));
        assert_eq!(row.value("Missing"), Value::Null);
    }

    #[test]
    fn test_has_prefix() {
        let row = Row::from_pairs([("Address_City".to_string(), Value::Null)]);
        assert!(row.has_prefix("address_"));
        assert!(!row.has_prefix("Billing_"));
    }

    #[test]
    fn test_bind_replaces() {
        let mut p = Params::new();
        p.bind("a", 1).bind("b", 2).bind("a", 3);
        assert_eq!(p.len(), 2);
        assert_eq!(p.get("a"), Some(&Value::Int32(3)));
    }

    #[test]
    fn test_param_name() {
        assert_eq!(param_name("Title_en-US"), "Title_en_US");
        assert_eq!(param_name("__Site"), "__Site");
    }
}
