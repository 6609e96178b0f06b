// Module Descriptor - static registry entry for a pluggable scan module

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Registry key (e.g. "tcp_probe")
pub type ModuleKey = String;

/// How the entry point is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    /// Free function exported by the code unit
    Function,
    /// Construct `constructor_type` with no arguments, then call the entry point on it
    Method,
}

/// Immutable description of a module, defined at process start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub key: ModuleKey,
    /// Code unit that backs the module (loaded once per process)
    pub unit: String,
    pub entry_point: String,
    pub constructor_type: Option<String>,
    pub is_async: bool,
    pub description: String,
}

impl ModuleDescriptor {
    /// Free-function module
    pub fn function(
        key: impl Into<String>,
        unit: impl Into<String>,
        entry_point: impl Into<String>,
        is_async: bool,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            unit: unit.into(),
            entry_point: entry_point.into(),
            constructor_type: None,
            is_async,
            description: description.into(),
        }
    }

    /// Constructed-object-then-method module
    pub fn method(
        key: impl Into<String>,
        unit: impl Into<String>,
        constructor_type: impl Into<String>,
        entry_point: impl Into<String>,
        is_async: bool,
        description: impl Into<String>,
    ) -> Self {
        Self {
            constructor_type: Some(constructor_type.into()),
            ..Self::function(key, unit, entry_point, is_async, description)
        }
    }

    pub fn invocation_kind(&self) -> InvocationKind {
        match self.constructor_type {
            Some(_) => InvocationKind::Method,
            None => InvocationKind::Function,
        }
    }

    /// Key used for the process-wide unit cache ("OT discovery" -> "OT_discovery")
    pub fn normalized_key(&self) -> String {
        normalize_key(&self.key)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| DomainError::InvalidDescriptor {
            key: self.key.clone(),
            reason: reason.to_string(),
        };

        if self.key.trim().is_empty() {
            return Err(invalid("key is empty"));
        }
        if self.unit.trim().is_empty() {
            return Err(invalid("unit is empty"));
        }
        if self.entry_point.trim().is_empty() {
            return Err(invalid("entry point is empty"));
        }
        if matches!(self.constructor_type.as_deref(), Some(t) if t.trim().is_empty()) {
            return Err(invalid("constructor type is empty"));
        }
        Ok(())
    }
}

pub fn normalize_key(key: &str) -> String {
    key.trim().replace(char::is_whitespace, "_")
}
