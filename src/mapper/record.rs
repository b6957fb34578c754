//! Object graphs.
//!
//! A [`Record`] is an instance of a model type: a type key plus named fields.
//! Fields hold a scalar, a language map, an optional nested record or a
//! collection of records, mirroring the property kinds.

use std::collections::BTreeMap;

use super::value::Value;

/// One field of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Value(Value),
    /// Language id to text; blank values are never stored.
    Languages(BTreeMap<String, String>),
    Nested(Option<Box<Record>>),
    Collection(Vec<Record>),
}

/// An instance of a model type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub type_key: String,
    pub fields: BTreeMap<String, Field>,
}

impl Record {
    pub fn new(type_key: impl Into<String>) -> Self {
        Self {
            type_key: type_key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder: set a scalar field.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Builder: set a language map from (language, text) pairs.
    pub fn with_languages<'a>(
        mut self,
        name: &str,
        values: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let map = values
            .into_iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.fields.insert(name.to_string(), Field::Languages(map));
        self
    }

    /// Builder: set a nested record.
    pub fn with_nested(mut self, name: &str, nested: Option<Record>) -> Self {
        self.fields
            .insert(name.to_string(), Field::Nested(nested.map(Box::new)));
        self
    }

    /// Builder: set a collection.
    pub fn with_collection(mut self, name: &str, items: Vec<Record>) -> Self {
        self.fields
            .insert(name.to_string(), Field::Collection(items));
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields
            .insert(name.to_string(), Field::Value(value.into()));
    }

    /// Scalar field value; `None` if absent or not a scalar.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(Field::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Scalar field value, NULL when absent.
    pub fn value(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn languages(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        match self.fields.get(name) {
            Some(Field::Languages(m)) => Some(m),
            _ => None,
        }
    }

    pub fn set_languages(&mut self, name: &str, map: BTreeMap<String, String>) {
        self.fields.insert(name.to_string(), Field::Languages(map));
    }

    pub fn nested(&self, name: &str) -> Option<&Record> {
        match self.fields.get(name) {
            Some(Field::Nested(Some(r))) => Some(r),
            _ => None,
        }
    }

    /// Collection items; empty when absent.
    pub fn collection(&self, name: &str) -> &[Record] {
        match self.fields.get(name) {
            Some(Field::Collection(items)) => items,
            _ => &[],
        }
    }

    /// Field at a property path through nested records.
    pub fn field_at(&self, path: &[String]) -> Option<&Field> {
        let (last, parents) = path.split_last()?;
        let mut current = self;
        for name in parents {
            current = current.nested(name)?;
        }
        current.fields.get(last)
    }

    /// Mutable field at a property path through nested records.
    pub fn field_at_mut(&mut self, path: &[String]) -> Option<&mut Field> {
        let (last, parents) = path.split_last()?;
        let mut current: &mut Record = self;
        for name in parents {
            current = match current.fields.get_mut(name.as_str()) {
                Some(Field::Nested(Some(inner))) => &mut **inner,
                _ => return None,
            };
        }
        current.fields.get_mut(last.as_str())
    }

    /// Set the field at a property path. Returns `false` when an enclosing
    /// nested record is absent.
    pub fn set_at(&mut self, path: &[String], field: Field) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return false;
        };
        let mut current: &mut Record = self;
        for name in parents {
            current = match current.fields.get_mut(name.as_str()) {
                Some(Field::Nested(Some(inner))) => &mut **inner,
                _ => return false,
            };
        }
        current.fields.insert(last.clone(), field);
        true
    }

    /// Whether every value in the record (and its nested records) is empty.
    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|f| match f {
            Field::Value(v) => v.is_null(),
            Field::Languages(m) => m.is_empty(),
            Field::Nested(None) => true,
            Field::Nested(Some(r)) => r.is_blank(),
            Field::Collection(items) => items.is_empty(),
        })
    }

    /// Append to a collection field, creating it when absent.
    pub fn push_item(&mut self, name: &str, item: Record) {
        match self.fields.get_mut(name) {
            Some(Field::Collection(items)) => items.push(item),
            _ => {
                self.fields
                    .insert(name.to_string(), Field::Collection(vec![item]));
            }
        }
    }
}
