//! Raw source records
//!
//! A [`Record`] is a JSON:API resource object (`id`, `type`, `attributes`,
//! `relationships`) reduced to the dotted-path properties an extractor asked
//! for. Dotted paths address nested objects: `attributes.vcs-repo.identifier`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A projected source platform record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value, returning `None` unless it is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Origin platform id
    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    /// `attributes.name`, used by inclusion patterns
    pub fn name(&self) -> Option<&str> {
        self.get_str("attributes.name")
    }

    /// Value at a dotted path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// String value at a dotted path
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Boolean at a dotted path, `false` when absent
    pub fn get_bool(&self, path: &str) -> bool {
        self.get(path).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Whether a dotted path holds a non-null value
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some_and(|v| !v.is_null())
    }

    /// Single related id (`relationships.<name>.data.id`)
    pub fn related_id(&self, relation: &str) -> Option<&str> {
        self.get_str(&format!("relationships.{relation}.data.id"))
    }

    /// Ordered related ids (`relationships.<name>.data[].id`)
    pub fn related_ids(&self, relation: &str) -> Vec<&str> {
        match self.get(&format!("relationships.{relation}.data")) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.get("id").and_then(Value::as_str))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Set a value at a dotted path, creating intermediate objects
    pub fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut current = &mut self.0;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.to_string(), value);
    }

    /// Remove the value at a dotted path
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let (parents, last) = match path.rsplit_once('.') {
            Some((parents, last)) => (Some(parents), last),
            None => (None, path),
        };
        let map = match parents {
            None => &mut self.0,
            Some(parents) => {
                let mut current = &mut self.0;
                for segment in parents.split('.') {
                    current = current.get_mut(segment)?.as_object_mut()?;
                }
                current
            }
        };
        map.remove(last)
    }

    /// Copy only the listed dotted paths; absent paths stay absent
    pub fn project(&self, properties: &[&str]) -> Record {
        if properties.is_empty() {
            return self.clone();
        }
        let mut projected = Record::new();
        for property in properties {
            if let Some(value) = self.get(property) {
                projected.set(property, value.clone());
            }
        }
        projected
    }

    /// Append an audit warning
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warnings = self
            .0
            .entry("warnings".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = warnings {
            items.push(Value::String(warning.into()));
        }
    }

    pub fn warnings(&self) -> Vec<&str> {
        match self.0.get("warnings") {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
