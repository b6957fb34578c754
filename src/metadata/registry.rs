//! Derived-type registry.
//!
//! Base tables record the concrete type of each row as a (module, type name)
//! pair. The registry maps that pair back to a model type key and a factory
//! producing an empty record of that type. It is populated at startup.

use std::collections::HashMap;
use std::sync::Arc;

use super::descriptor::ModelType;
use crate::error::ConfigError;
use crate::mapper::record::Record;

/// Creates an empty record of a registered type.
pub type Factory = Arc<dyn Fn() -> Record + Send + Sync>;

/// A registered concrete type.
#[derive(Clone)]
pub struct RegisteredType {
    pub key: String,
    pub factory: Factory,
}

impl std::fmt::Debug for RegisteredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredType").field("key", &self.key).finish()
    }
}

/// Mapping from (module, type name) to concrete types.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    entries: HashMap<(String, String), RegisteredType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type with an explicit factory.
    pub fn register(
        &mut self,
        module: impl Into<String>,
        type_name: impl Into<String>,
        key: impl Into<String>,
        factory: Factory,
    ) {
        let key = key.into();
        self.entries.insert(
            (module.into(), type_name.into()),
            RegisteredType { key, factory },
        );
    }

    /// Register a model type with a factory producing an empty record.
    pub fn register_model(&mut self, model: &ModelType) {
        let key = model.key.clone();
        let record_key = key.clone();
        self.register(
            model.module.clone(),
            model.name.clone(),
            key,
            Arc::new(move || Record::new(record_key.clone())),
        );
    }

    /// Resolve a stored (module, type name) pair.
    pub fn resolve(&self, module: &str, type_name: &str) -> Result<&RegisteredType, ConfigError> {
        self.entries
            .get(&(module.to_string(), type_name.to_string()))
            .ok_or_else(|| ConfigError::UnresolvedDerivedType {
                module: module.to_string(),
                type_name: type_name.to_string(),
            })
    }

    /// Resolve and instantiate an empty record.
    pub fn instantiate(&self, module: &str, type_name: &str) -> Result<Record, ConfigError> {
        self.resolve(module, type_name).map(|t| (t.factory)())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
