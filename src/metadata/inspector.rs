//! Metadata Inspector: validated, cached model type descriptions.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::descriptor::{Inheritance, ModelType, PropertyKind, ValueType};
use crate::error::ConfigError;

/// A source of model type descriptions.
///
/// Implementations return raw descriptions; the [`Inspector`] validates
/// them. Descriptions must be stable: the same key always yields the same
/// type.
pub trait MetadataSource: Send + Sync {
    /// Describe a type by key.
    fn describe(&self, key: &str) -> Option<ModelType>;

    /// Every type key the source knows, in declaration order.
    fn type_keys(&self) -> Vec<String>;
}

/// In-process metadata source built from `ModelType` values.
#[derive(Debug, Default, Clone)]
pub struct StaticSource {
    types: Vec<ModelType>,
}

impl StaticSource {
    pub fn new(types: impl IntoIterator<Item = ModelType>) -> Self {
        Self {
            types: types.into_iter().collect(),
        }
    }

    pub fn add(&mut self, t: ModelType) {
        self.types.retain(|x| x.key != t.key);
        self.types.push(t);
    }
}

impl MetadataSource for StaticSource {
    fn describe(&self, key: &str) -> Option<ModelType> {
        self.types.iter().find(|t| t.key == key).cloned()
    }

    fn type_keys(&self) -> Vec<String> {
        self.types.iter().map(|t| t.key.clone()).collect()
    }
}

/// Validating, caching front of a [`MetadataSource`].
pub struct Inspector {
    source: Arc<dyn MetadataSource>,
    cache: DashMap<String, Arc<ModelType>>,
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector")
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl Inspector {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self {
            source,
            cache: DashMap::new(),
        }
    }

    /// Validated description of a type.
    pub fn describe(&self, key: &str) -> Result<Arc<ModelType>, ConfigError> {
        if let Some(t) = self.cache.get(key) {
            return Ok(t.clone());
        }

        let t = self
            .source
            .describe(key)
            .ok_or_else(|| ConfigError::UnknownType(key.to_string()))?;
        self.validate(&t)?;

        debug!(type_key = key, properties = t.properties.len(), "described model type");
        let t = Arc::new(t);
        self.cache.insert(key.to_string(), t.clone());
        Ok(t)
    }

    /// Every type key of the underlying source.
    pub fn type_keys(&self) -> Vec<String> {
        self.source.type_keys()
    }

    /// Types derived from the given base.
    pub fn derived_types(&self, base_key: &str) -> Result<Vec<Arc<ModelType>>, ConfigError> {
        let mut out = Vec::new();
        for key in self.source.type_keys() {
            let t = self.describe(&key)?;
            if t.base_key() == Some(base_key) {
                out.push(t);
            }
        }
        Ok(out)
    }

    /// Drop cached descriptions.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    fn validate(&self, t: &ModelType) -> Result<(), ConfigError> {
        let mut identities = 0;

        for p in &t.properties {
            if !p.persisted {
                continue;
            }

            match p.kind {
                PropertyKind::Identity => {
                    identities += 1;
                    if p.value_type != ValueType::Int32 {
                        return Err(ConfigError::invalid_identity(
                            &t.name,
                            &p.name,
                            "identity must be a 32-bit integer",
                        ));
                    }
                    if identities > 1 {
                        return Err(ConfigError::invalid_identity(
                            &t.name,
                            &p.name,
                            "a type can have at most one identity",
                        ));
                    }
                }
                PropertyKind::MultiLanguageText => {
                    if p.value_type != ValueType::Text {
                        return Err(ConfigError::unsupported(
                            &t.name,
                            &p.name,
                            p.value_type.runtime_name(),
                        ));
                    }
                }
                PropertyKind::Collection | PropertyKind::Nested => {
                    let model = p.value_type.model_key().ok_or_else(|| {
                        ConfigError::unsupported(&t.name, &p.name, p.value_type.runtime_name())
                    })?;
                    if self.source.describe(model).is_none() {
                        return Err(ConfigError::UnknownType(model.to_string()));
                    }
                }
                PropertyKind::Binary => {
                    if p.value_type.model_key().is_some() {
                        return Err(ConfigError::unsupported(
                            &t.name,
                            &p.name,
                            p.value_type.runtime_name(),
                        ));
                    }
                }
                PropertyKind::Scalar
                | PropertyKind::PrimaryKey
                | PropertyKind::SecondaryKey
                | PropertyKind::Computed => {
                    if matches!(p.value_type, ValueType::Model(_) | ValueType::Opaque(_)) {
                        return Err(ConfigError::unsupported(
                            &t.name,
                            &p.name,
                            p.value_type.runtime_name(),
                        ));
                    }
                }
            }

            if p.value_type == ValueType::Text
                && p.kind != PropertyKind::Computed
                && p.max_length.is_none()
            {
                return Err(ConfigError::missing_max_length(&t.name, &p.name));
            }
        }

        if let Inheritance::Derived { base } = &t.inheritance {
            match self.source.describe(base) {
                Some(b) if b.inheritance == Inheritance::Base => {}
                Some(_) => {
                    return Err(ConfigError::InvalidDescriptor(format!(
                        "{} derives from {}, which is not declared as a base type",
                        t.key, base
                    )))
                }
                None => return Err(ConfigError::UnknownType(base.clone())),
            }
        }

        Ok(())
    }
}
