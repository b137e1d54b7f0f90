use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Materialized view of dynamic partition keys, one ordered key list per definition name.
///
/// Built once per snapshot; later registry mutations are not visible through it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicPartitionsState {
    definitions: BTreeMap<String, Vec<String>>,
}

impl DynamicPartitionsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: impl Into<String>, keys: Vec<String>) {
        self.definitions.insert(definition.into(), keys);
    }

    pub fn with_definition(mut self, definition: impl Into<String>, keys: Vec<String>) -> Self {
        self.insert(definition, keys);
        self
    }

    /// `None` when the definition was not captured (or is not registered).
    pub fn keys(&self, definition: &str) -> Option<&[String]> {
        self.definitions.get(definition).map(Vec::as_slice)
    }

    pub fn contains_definition(&self, definition: &str) -> bool {
        self.definitions.contains_key(definition)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}
