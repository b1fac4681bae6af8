//! Entity graphs and their on-disk snapshot
//!
//! A graph maps a pluralized collection name to an ordered list of records.
//! The raw graph holds projected source records ([`Record`]); the normalized
//! graph holds mapped [`Entity`] values. Both serialize to one JSON document
//! with sorted keys, which is the hand-off between pipeline stages.

pub mod entity;
pub mod schema;

pub use entity::{Entity, EntitySnapshot, Related, Relation};

use crate::error::Result;
use crate::record::Record;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Collections of records keyed by pluralized collection name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph<T> {
    collections: BTreeMap<String, Vec<T>>,
}

/// Extracted (and enriched) source records
pub type RawGraph = Graph<Record>;

/// Mapped target entities
pub type EntityGraph = Graph<Entity>;

impl<T> Default for Graph<T> {
    fn default() -> Self {
        Self {
            collections: BTreeMap::new(),
        }
    }
}

impl<T> Graph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of a collection; empty when the collection is absent
    pub fn collection(&self, name: &str) -> &[T] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn collection_mut(&mut self, name: &str) -> &mut Vec<T> {
        self.collections.entry(name.to_string()).or_default()
    }

    /// Replace a collection
    pub fn insert(&mut self, name: &str, records: Vec<T>) {
        self.collections.insert(name.to_string(), records);
    }

    pub fn extend(&mut self, name: &str, records: impl IntoIterator<Item = T>) {
        self.collection_mut(name).extend(records);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.collections
            .iter()
            .map(|(name, records)| (name.as_str(), records.as_slice()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Vec<T>)> {
        self.collections
            .iter_mut()
            .map(|(name, records)| (name.as_str(), records))
    }

    /// Total record count across collections
    pub fn len(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RawGraph {
    /// Find a raw record by origin id
    pub fn find(&self, collection: &str, id: &str) -> Option<&Record> {
        self.collection(collection).iter().find(|r| r.id() == Some(id))
    }
}

impl EntityGraph {
    /// Find an entity by source id
    pub fn find(&self, collection: &str, source_id: &str) -> Option<&Entity> {
        self.collection(collection)
            .iter()
            .find(|e| e.source_id == source_id)
    }
}

impl<T: Serialize + DeserializeOwned> Graph<T> {
    /// Load a snapshot written by [`Graph::save`]
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading graph snapshot");
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the snapshot as pretty-printed JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        fs::write(path, content)?;
        info!(path = %path.display(), records = self.len(), "Saved graph snapshot");
        Ok(())
    }
}

/// Copy a snapshot to `<stem>.<timestamp>.bak.json` next to it
pub fn backup(path: &Path) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let backup_path = path.with_file_name(format!("{stem}.{timestamp}.bak.json"));
    fs::copy(path, &backup_path)?;
    info!(path = %backup_path.display(), "Backed up graph snapshot");
    Ok(backup_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> EntityGraph {
        let mut graph = EntityGraph::new();
        graph.insert(
            schema::target::SPACES,
            vec![Entity::new("acme").with("name", "acme")],
        );
        graph.insert(
            schema::target::STACKS,
            vec![Entity::new("ws-1")
                .with("name", "network")
                .with_relation("space", Relation::one("acme"))],
        );
        graph
    }

    #[test]
    fn test_absent_collection_is_empty() {
        let graph = sample();
        assert!(graph.collection("contexts").is_empty());
        assert_eq!(graph.len(), 2);
        assert!(graph.find("stacks", "ws-1").is_some());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.json");
        let graph = sample();
        graph.save(&path).unwrap();

        let loaded = EntityGraph::load(&path).unwrap();
        assert_eq!(loaded, graph);
    }

    #[test]
    fn test_save_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");
        sample().save(&first).unwrap();
        sample().save(&second).unwrap();
        assert_eq!(
            fs::read_to_string(first).unwrap(),
            fs::read_to_string(second).unwrap()
        );
    }

    #[test]
    fn test_raw_graph_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.json");
        let mut graph = RawGraph::new();
        graph.insert(
            schema::source::ORGANIZATIONS,
            vec![Record::from_value(json!({"id": "acme", "attributes": {"name": "acme"}})).unwrap()],
        );
        graph.save(&path).unwrap();
        let loaded = RawGraph::load(&path).unwrap();
        assert_eq!(loaded.find("organizations", "acme").unwrap().name(), Some("acme"));
    }

    #[test]
    fn test_backup_copies_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        sample().save(&path).unwrap();

        let backup_path = backup(&path).unwrap();
        let name = backup_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("data.") && name.ends_with(".bak.json"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            fs::read_to_string(&backup_path).unwrap()
        );
    }
}
