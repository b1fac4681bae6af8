//! Collection names, declared relationships and the collection dependency DAG

use crate::error::{MigrationError, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Source (raw graph) collection names
pub mod source {
    pub const ORGANIZATIONS: &str = "organizations";
    pub const AGENT_POOLS: &str = "agent_pools";
    pub const MODULES: &str = "modules";
    pub const POLICIES: &str = "policies";
    pub const POLICY_SETS: &str = "policy_sets";
    pub const PROJECTS: &str = "projects";
    pub const PROVIDERS: &str = "providers";
    pub const TASKS: &str = "tasks";
    pub const TEAMS: &str = "teams";
    pub const VARIABLE_SETS: &str = "variable_sets";
    pub const VARIABLE_SET_VARIABLES: &str = "variable_set_variables";
    pub const WORKSPACES: &str = "workspaces";
    pub const WORKSPACE_VARIABLES: &str = "workspace_variables";
}

/// Target (normalized graph) collection names
pub mod target {
    pub const SPACES: &str = "spaces";
    pub const STACKS: &str = "stacks";
    pub const MODULES: &str = "modules";
    pub const STACK_VARIABLES: &str = "stack_variables";
    pub const CONTEXTS: &str = "contexts";
    pub const CONTEXT_VARIABLES: &str = "context_variables";

    pub const ALL: &[&str] = &[
        SPACES,
        STACKS,
        MODULES,
        STACK_VARIABLES,
        CONTEXTS,
        CONTEXT_VARIABLES,
    ];
}

/// A declared relationship `collection.relation -> target`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationDef {
    pub collection: &'static str,
    pub relation: &'static str,
    pub target: &'static str,
}

pub const RELATIONS: &[RelationDef] = &[
    RelationDef { collection: target::STACKS, relation: "space", target: target::SPACES },
    RelationDef { collection: target::MODULES, relation: "space", target: target::SPACES },
    RelationDef { collection: target::STACK_VARIABLES, relation: "space", target: target::SPACES },
    RelationDef { collection: target::STACK_VARIABLES, relation: "stack", target: target::STACKS },
    RelationDef { collection: target::CONTEXTS, relation: "space", target: target::SPACES },
    RelationDef { collection: target::CONTEXTS, relation: "stacks", target: target::STACKS },
    RelationDef { collection: target::CONTEXT_VARIABLES, relation: "context", target: target::CONTEXTS },
];

/// How a collection derives `_migration_id`
#[derive(Debug, Clone, Copy)]
pub struct MigrationIdRule {
    pub collection: &'static str,
    /// Relationship whose migration id prefixes this one
    pub scope: Option<&'static str>,
    /// Own fields joined after the scope
    pub parts: &'static [&'static str],
}

pub const MIGRATION_ID_RULES: &[MigrationIdRule] = &[
    MigrationIdRule { collection: target::SPACES, scope: None, parts: &["name"] },
    MigrationIdRule { collection: target::STACKS, scope: None, parts: &["name"] },
    MigrationIdRule { collection: target::MODULES, scope: None, parts: &["name", "terraform_provider"] },
    MigrationIdRule { collection: target::STACK_VARIABLES, scope: Some("stack"), parts: &["type", "name"] },
    MigrationIdRule { collection: target::CONTEXTS, scope: None, parts: &["name"] },
    MigrationIdRule { collection: target::CONTEXT_VARIABLES, scope: Some("context"), parts: &["type", "name"] },
];

/// Collection referenced by `collection.relation`
pub fn relation_target(collection: &str, relation: &str) -> Option<&'static str> {
    RELATIONS
        .iter()
        .find(|def| def.collection == collection && def.relation == relation)
        .map(|def| def.target)
}

pub fn migration_id_rule(collection: &str) -> Option<&'static MigrationIdRule> {
    MIGRATION_ID_RULES.iter().find(|rule| rule.collection == collection)
}

/// Target collections ordered so that every collection follows the ones it references
pub fn mapping_order() -> Result<Vec<&'static str>> {
    dependency_order(target::ALL, RELATIONS)
}

/// Topological order of `collections` under `relations`; a cycle is an error
pub fn dependency_order(
    collections: &[&'static str],
    relations: &[RelationDef],
) -> Result<Vec<&'static str>> {
    let mut graph: DiGraph<&'static str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    for &collection in collections {
        nodes.insert(collection, graph.add_node(collection));
    }

    for def in relations {
        if let (Some(&from), Some(&to)) = (nodes.get(def.target), nodes.get(def.collection)) {
            graph.add_edge(from, to, ());
        }
    }

    toposort(&graph, None)
        .map(|order| order.into_iter().map(|idx| graph[idx]).collect())
        .map_err(|cycle| MigrationError::CollectionCycle(graph[cycle.node_id()].to_string()))
}
