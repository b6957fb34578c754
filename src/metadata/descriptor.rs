//! Property and model type descriptors.
//!
//! A [`ModelType`] is what the engine knows about a persisted type: its
//! dataset (table) name, inheritance role and an ordered list of
//! [`PropertyDescriptor`]s carrying semantic tags. Everything downstream
//! (schema builder, statement generator, mapper) is driven by these values.

use serde::{Deserialize, Serialize};

use crate::sql::types::ColumnType;

/// Semantic kind of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Scalar,
    /// Database-assigned 32-bit surrogate key.
    Identity,
    PrimaryKey,
    SecondaryKey,
    /// Raw bytes, or any other value stored as a serialized blob.
    Binary,
    /// One text column per active language.
    MultiLanguageText,
    /// One-to-many collection of a nested model type, stored in a subtable.
    Collection,
    /// Nested object flattened into prefixed columns.
    Nested,
    /// Read-only value, rendered from an expression when one is given.
    Computed,
}

impl PropertyKind {
    /// Part of the Get key.
    pub fn is_key(&self) -> bool {
        matches!(self, PropertyKind::PrimaryKey | PropertyKind::SecondaryKey)
    }
}

/// Runtime type of a property value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Int32,
    Int64,
    Decimal { precision: u8, scale: u8 },
    Boolean,
    Guid,
    DateTime,
    /// Time span, stored as 100ns ticks.
    Duration,
    Float,
    Text,
    Bytes,
    /// Structured value stored as a JSON blob.
    Serialized,
    /// Enumeration stored by ordinal.
    Enum { variants: Vec<String> },
    /// Another model type (nested object or collection element).
    Model(String),
    /// A runtime class with no relational mapping.
    Opaque(String),
}

impl ValueType {
    /// Column type for a scalar value; `None` for model and opaque types.
    pub fn column_type(&self, max_length: Option<u32>) -> Option<ColumnType> {
        Some(match self {
            ValueType::Int32 | ValueType::Enum { .. } => ColumnType::Int32,
            ValueType::Int64 | ValueType::Duration => ColumnType::Int64,
            ValueType::Decimal { precision, scale } => ColumnType::Decimal(*precision, *scale),
            ValueType::Boolean => ColumnType::Boolean,
            ValueType::Guid => ColumnType::Guid,
            ValueType::DateTime => ColumnType::DateTime,
            ValueType::Float => ColumnType::Float,
            ValueType::Text => ColumnType::text(max_length),
            ValueType::Bytes | ValueType::Serialized => ColumnType::VarBinary,
            ValueType::Model(_) | ValueType::Opaque(_) => return None,
        })
    }

    /// Referenced model type key.
    pub fn model_key(&self) -> Option<&str> {
        match self {
            ValueType::Model(key) => Some(key),
            _ => None,
        }
    }

    /// Display name used in error messages.
    pub fn runtime_name(&self) -> String {
        match self {
            ValueType::Model(key) => key.clone(),
            ValueType::Opaque(name) => name.clone(),
            other => format!("{:?}", other),
        }
    }
}

/// Value written into existing rows when a NOT NULL column is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// One property of a model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub column: String,
    pub kind: PropertyKind,
    pub value_type: ValueType,
    pub nullable: bool,
    pub max_length: Option<u32>,
    pub migration_default: Option<DefaultValue>,
    pub indexed: bool,
    pub unique: bool,
    pub persisted: bool,
    pub computed_expr: Option<String>,
}

impl PropertyDescriptor {
    /// Persisted, non-nullable scalar property whose column is named after it.
    pub fn new(name: impl Into<String>, kind: PropertyKind, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            value_type,
            nullable: false,
            max_length: None,
            migration_default: None,
            indexed: false,
            unique: false,
            persisted: true,
            computed_expr: None,
        }
    }

    pub fn scalar(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, PropertyKind::Scalar, value_type)
    }

    pub fn text(name: impl Into<String>, max_length: u32) -> Self {
        Self::new(name, PropertyKind::Scalar, ValueType::Text).max_length(max_length)
    }

    pub fn identity(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Identity, ValueType::Int32)
    }

    pub fn primary_key(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, PropertyKind::PrimaryKey, value_type)
    }

    pub fn secondary_key(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, PropertyKind::SecondaryKey, value_type)
    }

    pub fn multi_language(name: impl Into<String>, max_length: u32) -> Self {
        Self::new(name, PropertyKind::MultiLanguageText, ValueType::Text)
            .max_length(max_length)
            .nullable()
    }

    pub fn collection(name: impl Into<String>, element: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Collection, ValueType::Model(element.into()))
    }

    pub fn nested(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Nested, ValueType::Model(model.into()))
    }

    pub fn binary(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, PropertyKind::Binary, value_type).nullable()
    }

    pub fn computed(name: impl Into<String>, value_type: ValueType, expr: Option<&str>) -> Self {
        let mut p = Self::new(name, PropertyKind::Computed, value_type).nullable();
        p.computed_expr = expr.map(str::to_string);
        p
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn max_length(mut self, n: u32) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn migration_default(mut self, value: DefaultValue) -> Self {
        self.migration_default = Some(value);
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_persisted(mut self) -> Self {
        self.persisted = false;
        self
    }

    /// Whether the property is read back from the database at all.
    pub fn is_readable(&self) -> bool {
        self.persisted
            && (self.kind != PropertyKind::Computed || self.computed_expr.is_some())
    }

    /// Whether the property is written by Add and Update.
    pub fn is_writable(&self) -> bool {
        self.persisted && !matches!(self.kind, PropertyKind::Identity | PropertyKind::Computed)
    }
}

/// Inheritance role of a model type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Inheritance {
    #[default]
    None,
    /// Base of a derived-type split: its table carries the descriptor columns.
    Base,
    /// Derived from the given base type key.
    Derived { base: String },
}

/// Everything the engine knows about a persisted type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelType {
    /// Stable type key, unique across the model.
    pub key: String,
    /// Module (assembly) qualifier stored for derived-type resolution.
    pub module: String,
    /// Type name stored for derived-type resolution.
    pub name: String,
    /// Logical table name.
    pub dataset: String,
    pub properties: Vec<PropertyDescriptor>,
    pub inheritance: Inheritance,
    pub site_scoped: bool,
}

impl ModelType {
    pub fn new(
        module: impl Into<String>,
        name: impl Into<String>,
        dataset: impl Into<String>,
    ) -> Self {
        let module = module.into();
        let name = name.into();
        Self {
            key: format!("{}.{}", module, name),
            module,
            name,
            dataset: dataset.into(),
            properties: vec![],
            inheritance: Inheritance::None,
            site_scoped: false,
        }
    }

    pub fn property(mut self, p: PropertyDescriptor) -> Self {
        self.properties.push(p);
        self
    }

    pub fn site_scoped(mut self) -> Self {
        self.site_scoped = true;
        self
    }

    pub fn base(mut self) -> Self {
        self.inheritance = Inheritance::Base;
        self
    }

    pub fn derived_from(mut self, base: impl Into<String>) -> Self {
        self.inheritance = Inheritance::Derived { base: base.into() };
        self
    }

    /// Find a property by name.
    pub fn find(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// The identity property, if any.
    pub fn identity(&self) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.kind == PropertyKind::Identity && p.persisted)
    }

    /// Get-key properties: primary keys, then secondary keys.
    pub fn key_properties(&self) -> Vec<&PropertyDescriptor> {
        let primary = self
            .properties
            .iter()
            .filter(|p| p.persisted && p.kind == PropertyKind::PrimaryKey);
        let secondary = self
            .properties
            .iter()
            .filter(|p| p.persisted && p.kind == PropertyKind::SecondaryKey);
        primary.chain(secondary).collect()
    }

    /// Base type key for derived types.
    pub fn base_key(&self) -> Option<&str> {
        match &self.inheritance {
            Inheritance::Derived { base } => Some(base),
            _ => None,
        }
    }
}
