//! Resource type to profile mapping table.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// How one recognized resource type resolves to a profile.
///
/// Most types carry a single universal profile. Coded types resolve the
/// profile through a secondary code lookup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProfileRule {
    Profile(String),
    PerCode(BTreeMap<String, String>),
}

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("cannot read mapping file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid mapping table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Immutable type -> rule table, loaded once per process.
///
/// A lookup miss during request handling means the type is simply not in
/// scope; it is an expected outcome, never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct MappingTable {
    rules: BTreeMap<String, ProfileRule>,
}

impl MappingTable {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn from_value(value: Value) -> Result<Self, MappingError> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn rule(&self, resource_type: &str) -> Option<&ProfileRule> {
        self.rules.get(resource_type)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
