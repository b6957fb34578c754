//! TOML descriptor files.
//!
//! Lets the CLI (and tests) describe a model without code:
//!
//! ```toml
//! [[types]]
//! module = "Shop"
//! name = "Order"
//! dataset = "Orders"
//! site_scoped = true
//!
//! [[types.properties]]
//! name = "Id"
//! kind = "identity"
//! type = "int32"
//!
//! [[types.properties]]
//! name = "Title"
//! kind = "multi_language_text"
//! type = "text"
//! max_length = 200
//!
//! [[types.properties]]
//! name = "Lines"
//! kind = "collection"
//! model = "Shop.Line"
//! ```
//!
//! A derived type names its base with `base = "Module.Name"` and lists only
//! its own properties; the base's properties are prepended.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::descriptor::{
    DefaultValue, Inheritance, ModelType, PropertyDescriptor, PropertyKind, ValueType,
};
use super::inspector::StaticSource;
use crate::error::{ConfigError, Result};

#[derive(Debug, Deserialize)]
struct DescriptorFile {
    #[serde(default)]
    types: Vec<TypeSpec>,
}

#[derive(Debug, Deserialize)]
struct TypeSpec {
    module: String,
    name: String,
    dataset: Option<String>,
    #[serde(default)]
    site_scoped: bool,
    #[serde(default)]
    inheritance: Option<String>,
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    properties: Vec<PropertySpec>,
}

#[derive(Debug, Deserialize)]
struct PropertySpec {
    name: String,
    column: Option<String>,
    #[serde(default = "default_kind")]
    kind: PropertyKind,
    #[serde(rename = "type")]
    value_type: Option<String>,
    #[serde(default)]
    nullable: bool,
    max_length: Option<u32>,
    precision: Option<u8>,
    scale: Option<u8>,
    #[serde(default)]
    variants: Vec<String>,
    model: Option<String>,
    migration_default: Option<DefaultValue>,
    #[serde(default)]
    indexed: bool,
    #[serde(default)]
    unique: bool,
    #[serde(default = "default_true")]
    persisted: bool,
    computed: Option<String>,
}

/// Module, type, dataset and property names become SQL identifiers.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

fn check_name(what: &str, name: &str) -> std::result::Result<(), ConfigError> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidDescriptor(format!(
            "{} '{}' is not a valid name",
            what, name
        )))
    }
}

fn default_kind() -> PropertyKind {
    PropertyKind::Scalar
}

fn default_true() -> bool {
    true
}

impl PropertySpec {
    fn value_type(&self) -> ValueType {
        if let Some(model) = &self.model {
            return ValueType::Model(model.clone());
        }
        match self.value_type.as_deref().map(str::to_lowercase).as_deref() {
            Some("int32") | Some("int") => ValueType::Int32,
            Some("int64") | Some("long") => ValueType::Int64,
            Some("decimal") => ValueType::Decimal {
                precision: self.precision.unwrap_or(18),
                scale: self.scale.unwrap_or(2),
            },
            Some("boolean") | Some("bool") => ValueType::Boolean,
            Some("guid") | Some("uuid") => ValueType::Guid,
            Some("datetime") => ValueType::DateTime,
            Some("duration") | Some("timespan") => ValueType::Duration,
            Some("float") | Some("double") => ValueType::Float,
            Some("text") | Some("string") => ValueType::Text,
            Some("bytes") => ValueType::Bytes,
            Some("serialized") | Some("json") => ValueType::Serialized,
            Some("enum") => ValueType::Enum {
                variants: self.variants.clone(),
            },
            _ => ValueType::Opaque(self.value_type.clone().unwrap_or_else(|| "unknown".into())),
        }
    }

    fn into_descriptor(self) -> PropertyDescriptor {
        let value_type = self.value_type();
        let mut p = PropertyDescriptor::new(self.name, self.kind, value_type);
        if let Some(column) = self.column {
            p.column = column;
        }
        p.nullable = self.nullable;
        p.max_length = self.max_length;
        p.migration_default = self.migration_default;
        p.indexed = self.indexed;
        p.unique = self.unique;
        p.persisted = self.persisted;
        p.computed_expr = self.computed;
        p
    }
}

/// Parse descriptor TOML into a metadata source.
pub fn parse_descriptors(content: &str) -> Result<StaticSource> {
    let file: DescriptorFile = toml::from_str(content)
        .map_err(|e| ConfigError::InvalidDescriptor(e.message().to_string()))?;

    let mut types: Vec<ModelType> = Vec::with_capacity(file.types.len());
    let mut pending_bases: Vec<(usize, String)> = Vec::new();

    for spec in file.types {
        check_name("module", &spec.module)?;
        check_name("type", &spec.name)?;
        if let Some(dataset) = &spec.dataset {
            check_name("dataset", dataset)?;
        }
        for p in &spec.properties {
            check_name("property", &p.name)?;
        }
        let mut t = ModelType::new(
            spec.module.clone(),
            spec.name.clone(),
            spec.dataset.clone().unwrap_or_else(|| spec.name.clone()),
        );
        t.site_scoped = spec.site_scoped;
        t.inheritance = match (spec.inheritance.as_deref(), spec.base) {
            (_, Some(base)) => {
                pending_bases.push((types.len(), base.clone()));
                Inheritance::Derived { base }
            }
            (Some("base"), None) => Inheritance::Base,
            (Some(other), None) if other != "none" => {
                return Err(ConfigError::InvalidDescriptor(format!(
                    "unknown inheritance '{}' on {}.{}",
                    other, spec.module, spec.name
                ))
                .into())
            }
            _ => Inheritance::None,
        };
        t.properties = spec
            .properties
            .into_iter()
            .map(PropertySpec::into_descriptor)
            .collect();
        types.push(t);
    }

    // Derived types inherit their base's properties.
    for (index, base_key) in pending_bases {
        let base_props = types
            .iter()
            .find(|t| t.key == base_key)
            .map(|t| t.properties.clone())
            .ok_or_else(|| ConfigError::UnknownType(base_key.clone()))?;
        let own = std::mem::take(&mut types[index].properties);
        types[index].properties = base_props
            .into_iter()
            .chain(own)
            .collect();
    }

    Ok(StaticSource::new(types))
}

/// Load a descriptor file.
pub fn load_descriptor_file(path: impl AsRef<Path>) -> Result<StaticSource> {
    let content = fs::read_to_string(path)?;
    parse_descriptors(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::inspector::MetadataSource;

    const ZOO: &str = r#"
[[types]]
module = "Zoo"
name = "Animal"
dataset = "Animals"
inheritance = "base"

[[types.properties]]
name = "Id"
kind = "primary_key"
type = "int32"

[[types.properties]]
name = "Name"
type = "text"
max_length = 50
nullable = true

[[types]]
module = "Zoo"
name = "Dog"
dataset = "Dogs"
base = "Zoo.Animal"

[[types.properties]]
name = "Breed"
type = "text"
max_length = 30
migration_default = "unknown"

[[types.properties]]
name = "Mood"
type = "enum"
variants = ["Calm", "Excited"]
"#;

    #[test]
    fn test_parse_types() {
        let source = parse_descriptors(ZOO).unwrap();
        assert_eq!(source.type_keys(), vec!["Zoo.Animal", "Zoo.Dog"]);

        let animal = source.describe("Zoo.Animal").unwrap();
        assert_eq!(animal.inheritance, Inheritance::Base);
        assert_eq!(animal.dataset, "Animals");
        assert_eq!(animal.properties[0].kind, PropertyKind::PrimaryKey);
        assert!(animal.properties[1].nullable);
    }

    #[test]
    fn test_derived_inherits_base_properties() {
        let source = parse_descriptors(ZOO).unwrap();
        let dog = source.describe("Zoo.Dog").unwrap();
        let names: Vec<_> = dog.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Name", "Breed", "Mood"]);
        assert_eq!(
            dog.properties[2].migration_default,
            Some(DefaultValue::Text("unknown".into()))
        );
        assert_eq!(
            dog.properties[3].value_type,
            ValueType::Enum {
                variants: vec!["Calm".into(), "Excited".into()]
            }
        );
    }

    #[test]
    fn test_unknown_type_name_is_opaque() {
        let source = parse_descriptors(
            r#"
[[types]]
module = "M"
name = "A"

[[types.properties]]
name = "Stream"
type = "FileStream"
"#,
        )
        .unwrap();
        let a = source.describe("M.A").unwrap();
        assert_eq!(a.properties[0].value_type, ValueType::Opaque("FileStream".into()));
        assert_eq!(a.dataset, "A");
    }

    #[test]
    fn test_missing_base() {
        let err = parse_descriptors(
            r#"
[[types]]
module = "M"
name = "A"
base = "M.Nope"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("M.Nope"));
    }

    #[test]
    fn test_names_must_be_identifiers() {
        let err = parse_descriptors(
            r#"
[[types]]
module = "M"
name = "A"

[[types.properties]]
name = "Unit Price"
type = "float"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'Unit Price'"));
    }
}
