//! Normalized entities and their embedded relationship snapshots
//!
//! On disk an entity is a flat JSON object: the mapped fields plus
//! `_source_id`, `_migration_id` and `_relationships`. A relationship holds
//! either a bare source id (before expansion) or an [`EntitySnapshot`], an
//! immutable one-level copy of the referenced record. Snapshots have no
//! relationship field, so embedding can never nest.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const SOURCE_ID: &str = "_source_id";
const MIGRATION_ID: &str = "_migration_id";
const RELATIONSHIPS: &str = "_relationships";

/// Read-only copy of a related entity, without its relationships
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub source_id: String,
    pub migration_id: Option<String>,
    pub fields: Map<String, Value>,
}

/// One end of a relationship
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// Source id not yet resolved against the sibling collection
    Pending(String),
    /// Embedded snapshot of the referenced entity
    Resolved(Arc<EntitySnapshot>),
}

/// A single or ordered multi-valued relationship
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    One(Related),
    Many(Vec<Related>),
}

/// A record of the normalized graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", try_from = "Value")]
pub struct Entity {
    pub source_id: String,
    pub migration_id: Option<String>,
    pub fields: Map<String, Value>,
    pub relationships: BTreeMap<String, Relation>,
}

impl EntitySnapshot {
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(SOURCE_ID.to_string(), Value::String(self.source_id.clone()));
        if let Some(migration_id) = &self.migration_id {
            map.insert(MIGRATION_ID.to_string(), Value::String(migration_id.clone()));
        }
        Value::Object(map)
    }

    fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(mut map) = value else {
            return Err("embedded entity must be an object".to_string());
        };
        let (source_id, migration_id) = take_ids(&mut map)?;
        // A stored snapshot never carries relationships; drop any that slipped in.
        map.remove(RELATIONSHIPS);
        Ok(Self {
            source_id,
            migration_id,
            fields: map,
        })
    }
}

impl Related {
    pub fn source_id(&self) -> &str {
        match self {
            Related::Pending(id) => id,
            Related::Resolved(snapshot) => &snapshot.source_id,
        }
    }

    pub fn snapshot(&self) -> Option<&EntitySnapshot> {
        match self {
            Related::Pending(_) => None,
            Related::Resolved(snapshot) => Some(snapshot),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Related::Pending(id) => Value::String(id.clone()),
            Related::Resolved(snapshot) => snapshot.to_value(),
        }
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::String(id) => Ok(Related::Pending(id)),
            other => Ok(Related::Resolved(Arc::new(EntitySnapshot::from_value(other)?))),
        }
    }
}

impl Relation {
    pub fn one(source_id: impl Into<String>) -> Self {
        Relation::One(Related::Pending(source_id.into()))
    }

    pub fn many<I, S>(source_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Relation::Many(
            source_ids
                .into_iter()
                .map(|id| Related::Pending(id.into()))
                .collect(),
        )
    }

    /// Referenced source ids, in order
    pub fn source_ids(&self) -> Vec<&str> {
        match self {
            Relation::One(related) => vec![related.source_id()],
            Relation::Many(items) => items.iter().map(Related::source_id).collect(),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Relation::One(related) => related.to_value(),
            Relation::Many(items) => Value::Array(items.iter().map(Related::to_value).collect()),
        }
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Array(items) => Ok(Relation::Many(
                items
                    .into_iter()
                    .map(Related::from_value)
                    .collect::<Result<_, _>>()?,
            )),
            other => Ok(Relation::One(Related::from_value(other)?)),
        }
    }
}

impl Entity {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            migration_id: None,
            fields: Map::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style relationship setter
    pub fn with_relation(mut self, name: &str, relation: Relation) -> Self {
        self.relationships.insert(name.to_string(), relation);
        self
    }

    /// Field at a dotted path (`vcs.branch`)
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn str_field(&self, path: &str) -> Option<&str> {
        self.field(path).and_then(Value::as_str)
    }

    pub fn bool_field(&self, path: &str) -> bool {
        self.field(path).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relationships.get(name)
    }

    /// Source id of a single-valued relationship
    pub fn related_id(&self, name: &str) -> Option<&str> {
        match self.relationships.get(name)? {
            Relation::One(related) => Some(related.source_id()),
            Relation::Many(_) => None,
        }
    }

    /// Embedded snapshot of a single-valued relationship
    pub fn related(&self, name: &str) -> Option<&EntitySnapshot> {
        match self.relationships.get(name)? {
            Relation::One(related) => related.snapshot(),
            Relation::Many(_) => None,
        }
    }

    /// Copy-on-embed view of this entity
    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            source_id: self.source_id.clone(),
            migration_id: self.migration_id.clone(),
            fields: self.fields.clone(),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(SOURCE_ID.to_string(), Value::String(self.source_id.clone()));
        if let Some(migration_id) = &self.migration_id {
            map.insert(MIGRATION_ID.to_string(), Value::String(migration_id.clone()));
        }
        if !self.relationships.is_empty() {
            let relationships: Map<String, Value> = self
                .relationships
                .iter()
                .map(|(name, relation)| (name.clone(), relation.to_value()))
                .collect();
            map.insert(RELATIONSHIPS.to_string(), Value::Object(relationships));
        }
        Value::Object(map)
    }
}

fn take_ids(map: &mut Map<String, Value>) -> Result<(String, Option<String>), String> {
    let source_id = match map.remove(SOURCE_ID) {
        Some(Value::String(id)) => id,
        _ => return Err(format!("entity is missing a string {SOURCE_ID}")),
    };
    let migration_id = match map.remove(MIGRATION_ID) {
        Some(Value::String(id)) => Some(id),
        Some(Value::Null) | None => None,
        Some(_) => return Err(format!("{MIGRATION_ID} must be a string")),
    };
    Ok((source_id, migration_id))
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        entity.to_value()
    }
}

impl TryFrom<Value> for Entity {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err("entity must be an object".to_string());
        };
        let (source_id, migration_id) = take_ids(&mut map)?;
        let relationships = match map.remove(RELATIONSHIPS) {
            Some(Value::Object(relations)) => relations
                .into_iter()
                .map(|(name, value)| Ok((name, Relation::from_value(value)?)))
                .collect::<Result<BTreeMap<_, _>, String>>()?,
            Some(Value::Null) | None => BTreeMap::new(),
            Some(_) => return Err(format!("{RELATIONSHIPS} must be an object")),
        };
        Ok(Self {
            source_id,
            migration_id,
            fields: map,
            relationships,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_relations_serialize_as_ids() {
        let stack = Entity::new("ws-1")
            .with("name", "network")
            .with_relation("space", Relation::one("acme"));
        assert_eq!(
            serde_json::to_value(&stack).unwrap(),
            json!({"_source_id": "ws-1", "name": "network", "_relationships": {"space": "acme"}})
        );
    }

    #[test]
    fn test_round_trip_with_embedded_snapshots() {
        let value = json!({
            "_source_id": "varset-1",
            "_migration_id": "shared",
            "name": "shared",
            "_relationships": {
                "space": {"_source_id": "acme", "_migration_id": "acme", "name": "acme"},
                "stacks": [{"_source_id": "ws-1", "name": "network"}]
            }
        });
        let context: Entity = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(context.related("space").unwrap().migration_id.as_deref(), Some("acme"));
        assert_eq!(context.relation("stacks").unwrap().source_ids(), vec!["ws-1"]);
        assert_eq!(serde_json::to_value(&context).unwrap(), value);
    }

    #[test]
    fn test_embedded_relationships_are_stripped() {
        let value = json!({
            "_source_id": "var-1",
            "_relationships": {
                "stack": {"_source_id": "ws-1", "_relationships": {"space": "acme"}}
            }
        });
        let variable: Entity = serde_json::from_value(value).unwrap();
        let stack = variable.related("stack").unwrap();
        assert!(!stack.fields.contains_key("_relationships"));
    }

    #[test]
    fn test_missing_source_id_is_rejected() {
        assert!(serde_json::from_value::<Entity>(json!({"name": "x"})).is_err());
    }

    #[test]
    fn test_dotted_field_access() {
        let stack = Entity::new("ws-1").with("vcs", json!({"branch": "main"}));
        assert_eq!(stack.str_field("vcs.branch"), Some("main"));
        assert!(stack.field("vcs.namespace").is_none());
    }
}
