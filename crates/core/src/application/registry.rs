// Module Registry - static key -> descriptor mapping, built once at startup

use crate::domain::ModuleDescriptor;
use crate::error::{AppError, Result};
use std::collections::BTreeMap;

/// Immutable lookup table of registered modules
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, ModuleDescriptor>,
}

impl ModuleRegistry {
    /// Build the registry, rejecting invalid or duplicate descriptors
    pub fn new(descriptors: impl IntoIterator<Item = ModuleDescriptor>) -> Result<Self> {
        let mut modules = BTreeMap::new();
        for descriptor in descriptors {
            descriptor.validate()?;
            if modules.contains_key(&descriptor.key) {
                return Err(AppError::Config(format!(
                    "Module key registered twice: {}",
                    descriptor.key
                )));
            }
            modules.insert(descriptor.key.clone(), descriptor);
        }
        Ok(Self { modules })
    }

    /// Descriptor for `key`, or `UnknownModule` listing the valid keys
    pub fn lookup(&self, key: &str) -> Result<&ModuleDescriptor> {
        self.modules
            .get(key)
            .ok_or_else(|| AppError::UnknownModule {
                key: key.to_string(),
                available: self.keys(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.modules.contains_key(key)
    }

    /// `(key, description)` pairs in key order
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.modules
            .values()
            .map(|d| (d.key.as_str(), d.description.as_str()))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
