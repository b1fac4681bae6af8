//! Cascading name-pattern pruning of the normalized graph
//!
//! Stacks and modules are selected by name; everything else follows from
//! what survived, in a single pass:
//!
//! 1. stacks by name
//! 2. stack variables of surviving stacks
//! 3. modules by name
//! 4. contexts: auto-attached ones always, attached ones when at least one
//!    attached stack survived (the attachment list is pruned), unattached ones
//!    always
//! 5. context variables of surviving contexts
//! 6. spaces referenced by a surviving stack, module or context, plus spaces
//!    nothing referenced in the first place
//!
//! Records newly orphaned by a later step are not revisited.

use crate::config::FilterConfig;
use crate::error::{MigrationError, Result};
use crate::graph::schema::target;
use crate::graph::{Entity, EntityGraph, Related, Relation};
use crate::mapping::AUTOATTACH_LABEL;
use crate::pattern::NamePattern;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

/// Collections that accept a name pattern
pub const FILTERABLE: &[&str] = &[target::STACKS, target::MODULES];

#[derive(Debug, Clone, Default)]
pub struct GraphFilter {
    stacks: NamePattern,
    modules: NamePattern,
}

impl GraphFilter {
    /// Filter that keeps everything
    pub fn include_all() -> Self {
        Self::default()
    }

    pub fn new(stacks: NamePattern, modules: NamePattern) -> Self {
        Self { stacks, modules }
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        if let Some(unknown) = config
            .patterns
            .keys()
            .find(|key| !FILTERABLE.contains(&key.as_str()))
        {
            return Err(MigrationError::Config(format!(
                "cannot filter '{unknown}' by name; supported collections: {}",
                FILTERABLE.join(", ")
            )));
        }
        Ok(Self {
            stacks: NamePattern::from_option(config.patterns.get(target::STACKS).map(String::as_str))?,
            modules: NamePattern::from_option(config.patterns.get(target::MODULES).map(String::as_str))?,
        })
    }

    /// Build the pruned graph; the input is left untouched
    pub fn apply(&self, graph: &EntityGraph) -> EntityGraph {
        info!("Start filtering data");
        let mut filtered = EntityGraph::new();

        let stacks = keep_named(graph.collection(target::STACKS), &self.stacks);
        let stack_ids = source_ids(&stacks);

        let stack_variables: Vec<Entity> = graph
            .collection(target::STACK_VARIABLES)
            .iter()
            .filter(|variable| variable.related_id("stack").is_some_and(|id| stack_ids.contains(id)))
            .cloned()
            .collect();

        let modules = keep_named(graph.collection(target::MODULES), &self.modules);

        let contexts: Vec<Entity> = graph
            .collection(target::CONTEXTS)
            .iter()
            .filter_map(|context| filter_context(context, &stack_ids))
            .collect();
        let context_ids = source_ids(&contexts);

        let context_variables: Vec<Entity> = graph
            .collection(target::CONTEXT_VARIABLES)
            .iter()
            .filter(|variable| variable.related_id("context").is_some_and(|id| context_ids.contains(id)))
            .cloned()
            .collect();

        let referenced_before = referenced_spaces(
            graph
                .collection(target::STACKS)
                .iter()
                .chain(graph.collection(target::MODULES))
                .chain(graph.collection(target::CONTEXTS)),
        );
        let referenced_after = referenced_spaces(stacks.iter().chain(&modules).chain(&contexts));
        let spaces: Vec<Entity> = graph
            .collection(target::SPACES)
            .iter()
            .filter(|space| {
                let id = space.source_id.as_str();
                referenced_after.contains(id) || !referenced_before.contains(id)
            })
            .cloned()
            .collect();

        filtered.insert(target::SPACES, spaces);
        filtered.insert(target::STACKS, stacks);
        filtered.insert(target::STACK_VARIABLES, stack_variables);
        filtered.insert(target::MODULES, modules);
        filtered.insert(target::CONTEXTS, contexts);
        filtered.insert(target::CONTEXT_VARIABLES, context_variables);

        for (name, records) in filtered.iter() {
            debug!(
                collection = name,
                kept = records.len(),
                total = graph.collection(name).len(),
                "Filtered collection"
            );
        }
        info!("Stop filtering data");
        filtered
    }
}

fn keep_named(entities: &[Entity], pattern: &NamePattern) -> Vec<Entity> {
    entities
        .iter()
        .filter(|entity| pattern.matches(entity.name()))
        .cloned()
        .collect()
}

fn source_ids(entities: &[Entity]) -> HashSet<String> {
    entities.iter().map(|e| e.source_id.clone()).collect()
}

fn referenced_spaces<'a>(entities: impl Iterator<Item = &'a Entity>) -> HashSet<&'a str> {
    entities.filter_map(|entity| entity.related_id("space")).collect()
}

fn is_autoattached(context: &Entity) -> bool {
    match context.field("labels") {
        Some(Value::Array(labels)) => labels.iter().any(|label| label.as_str() == Some(AUTOATTACH_LABEL)),
        _ => false,
    }
}

fn filter_context(context: &Entity, stack_ids: &HashSet<String>) -> Option<Entity> {
    if is_autoattached(context) {
        return Some(context.clone());
    }
    let attached: &[Related] = match context.relation("stacks") {
        Some(Relation::Many(items)) if !items.is_empty() => items,
        _ => return Some(context.clone()),
    };

    let surviving: Vec<Related> = attached
        .iter()
        .filter(|related| stack_ids.contains(related.source_id()))
        .cloned()
        .collect();
    if surviving.is_empty() {
        return None;
    }

    let mut context = context.clone();
    context
        .relationships
        .insert("stacks".to_string(), Relation::Many(surviving));
    Some(context)
}
