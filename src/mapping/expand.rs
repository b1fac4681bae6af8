//! Relationship expansion and migration id assignment
//!
//! Runs in two passes over the collections in dependency order: first every
//! entity gets its `_migration_id`, then every relationship is replaced by a
//! snapshot of the referenced entity. Snapshots are built from the current
//! fields, so expanding an expanded graph changes nothing.

use super::normalize::migration_id;
use crate::error::{MigrationError, Result};
use crate::graph::schema::{self, MigrationIdRule};
use crate::graph::{Entity, EntityGraph, EntitySnapshot, Related, Relation};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

pub fn expand_relationships(graph: &mut EntityGraph) -> Result<()> {
    info!("Start expanding relationships");
    let order = schema::mapping_order()?;

    for collection in &order {
        assign_migration_ids(graph, collection)?;
    }

    let mut snapshots: HashMap<(&str, String), Arc<EntitySnapshot>> = HashMap::new();
    for collection in &order {
        for entity in graph.collection(collection) {
            snapshots.insert((*collection, entity.source_id.clone()), Arc::new(entity.snapshot()));
        }
    }

    for collection in &order {
        for entity in graph.collection_mut(collection).iter_mut() {
            for (relation_name, relation) in entity.relationships.iter_mut() {
                let resolve = |related: &Related| -> Result<Related> {
                    let unresolved = || MigrationError::UnresolvedRelationship {
                        collection: collection.to_string(),
                        relation: relation_name.clone(),
                        source_id: related.source_id().to_string(),
                    };
                    let target = schema::relation_target(collection, relation_name).ok_or_else(unresolved)?;
                    snapshots
                        .get(&(target, related.source_id().to_string()))
                        .map(|snapshot| Related::Resolved(Arc::clone(snapshot)))
                        .ok_or_else(unresolved)
                };
                let resolved = match &*relation {
                    Relation::One(related) => Relation::One(resolve(related)?),
                    Relation::Many(items) => {
                        Relation::Many(items.iter().map(resolve).collect::<Result<_>>()?)
                    }
                };
                *relation = resolved;
            }
        }
    }

    info!("Stop expanding relationships");
    Ok(())
}

fn assign_migration_ids(graph: &mut EntityGraph, collection: &str) -> Result<()> {
    let Some(rule) = schema::migration_id_rule(collection) else {
        return Ok(());
    };

    let ids = graph
        .collection(collection)
        .iter()
        .map(|entity| {
            let id = derive_id(graph, collection, rule, entity)?;
            Ok((entity.source_id.clone(), id))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut seen_sources: HashSet<&str> = HashSet::new();
    let mut seen_ids: HashMap<&str, &str> = HashMap::new();
    for (source_id, id) in &ids {
        if !seen_sources.insert(source_id) {
            return Err(MigrationError::DuplicateSourceId {
                collection: collection.to_string(),
                source_id: source_id.clone(),
            });
        }
        if let Some(first) = seen_ids.insert(id, source_id) {
            return Err(MigrationError::MigrationIdCollision {
                collection: collection.to_string(),
                migration_id: id.clone(),
                first: first.to_string(),
                second: source_id.clone(),
            });
        }
    }

    for (entity, (_, id)) in graph.collection_mut(collection).iter_mut().zip(ids) {
        entity.migration_id = Some(id);
    }
    Ok(())
}

fn derive_id(
    graph: &EntityGraph,
    collection: &str,
    rule: &MigrationIdRule,
    entity: &Entity,
) -> Result<String> {
    let invalid = || MigrationError::InvalidMigrationId {
        collection: collection.to_string(),
        source_id: entity.source_id.clone(),
    };

    let mut parts: Vec<String> = Vec::new();
    if let Some(scope) = rule.scope {
        let target = schema::relation_target(collection, scope).ok_or_else(invalid)?;
        let parent_id = entity.related_id(scope).ok_or_else(invalid)?;
        let parent = graph.find(target, parent_id).ok_or_else(|| MigrationError::UnresolvedRelationship {
            collection: collection.to_string(),
            relation: scope.to_string(),
            source_id: parent_id.to_string(),
        })?;
        parts.push(parent.migration_id.clone().ok_or_else(invalid)?);
    }
    for field in rule.parts {
        match entity.field(field) {
            Some(Value::String(value)) => parts.push(value.clone()),
            Some(Value::Null) | None => {}
            Some(other) => parts.push(other.to_string()),
        }
    }

    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    migration_id(&refs).ok_or_else(invalid)
}
