//! Source-to-target entity mapping
//!
//! Reads the raw graph without mutating it and builds the normalized graph:
//! organizations become spaces, workspaces become stacks, variable sets
//! become contexts. Collections are mapped in dependency order and then
//! expanded (see [`expand`]).

pub mod expand;
pub mod normalize;

pub use expand::expand_relationships;

use crate::error::{MigrationError, Result};
use crate::graph::schema::{self, source, target};
use crate::graph::{Entity, EntityGraph, RawGraph, Relation};
use crate::record::Record;
use crate::source::audit::is_valid_env_var_name;
use normalize::{
    collapse_vcs_provider, normalize_terraform_version, slugify, split_repository_identifier,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{info, warn};

/// Label that attaches a context to every stack of its space
pub const AUTOATTACH_LABEL: &str = "autoattach:*";

/// Build the normalized graph from an extracted (and enriched) raw graph
pub fn map_graph(raw: &RawGraph) -> Result<EntityGraph> {
    info!("Start mapping data");
    let mut graph = EntityGraph::new();

    for collection in schema::mapping_order()? {
        let entities = match collection {
            target::SPACES => map_spaces(raw),
            target::STACKS => map_stacks(raw)?,
            target::MODULES => map_modules(raw)?,
            target::STACK_VARIABLES => map_stack_variables(raw)?,
            target::CONTEXTS => map_contexts(raw),
            target::CONTEXT_VARIABLES => map_context_variables(raw),
            other => {
                warn!(collection = other, "No mapping for collection");
                Vec::new()
            }
        };
        info!(collection, count = entities.len(), "Mapped collection");
        graph.insert(collection, entities);
    }

    expand_relationships(&mut graph)?;
    info!("Stop mapping data");
    Ok(graph)
}

fn attr(record: &Record, path: &str) -> Value {
    record.get(path).cloned().unwrap_or(Value::Null)
}

fn source_id(record: &Record) -> String {
    record.id().unwrap_or_default().to_string()
}

fn organization_relation(record: &Record) -> Option<Relation> {
    record.related_id("organization").map(Relation::one)
}

/// VCS namespace and repository from `attributes.vcs-repo.identifier`
fn repository(record: &Record) -> Result<(Value, Value)> {
    match record.get_str("attributes.vcs-repo.identifier") {
        Some(identifier) if !identifier.is_empty() => {
            let (namespace, repository) = split_repository_identifier(identifier)?;
            Ok((Value::String(namespace), Value::String(repository)))
        }
        _ => Ok((Value::Null, Value::Null)),
    }
}

fn with_space(entity: Entity, record: &Record) -> Entity {
    match organization_relation(record) {
        Some(relation) => entity.with_relation("space", relation),
        None => entity,
    }
}

fn map_spaces(raw: &RawGraph) -> Vec<Entity> {
    raw.collection(source::ORGANIZATIONS)
        .iter()
        .map(|organization| Entity::new(source_id(organization)).with("name", attr(organization, "attributes.name")))
        .collect()
}

fn map_stacks(raw: &RawGraph) -> Result<Vec<Entity>> {
    let variables = raw.collection(source::WORKSPACE_VARIABLES);
    let has_invalid = |workspace_id: &str, sensitive: bool| {
        variables.iter().any(|variable| {
            variable.related_id("workspace") == Some(workspace_id)
                && variable.get_bool("attributes.sensitive") == sensitive
                && !is_valid_env_var_name(variable.get_str("attributes.key").unwrap_or_default())
        })
    };

    let mut stacks = Vec::new();
    for workspace in raw.collection(source::WORKSPACES) {
        let id = source_id(workspace);
        let provider = collapse_vcs_provider(workspace.get_str("attributes.vcs-repo.service-provider"))?;
        if provider.is_none() {
            warn!(
                "Workspace '{}/{}' has no VCS configuration",
                workspace.related_id("organization").unwrap_or_default(),
                workspace.name().unwrap_or_default()
            );
        }
        let (namespace, repository) = repository(workspace)?;
        let name = workspace.name().unwrap_or_default();

        let stack = Entity::new(id.clone())
            .with("autodeploy", attr(workspace, "attributes.auto-apply"))
            .with("description", attr(workspace, "attributes.description"))
            .with("has_variables_with_invalid_name", has_invalid(&id, false))
            .with("has_secret_variables_with_invalid_name", has_invalid(&id, true))
            .with("name", attr(workspace, "attributes.name"))
            .with("slug", slugify(name))
            .with(
                "terraform",
                json!({"version": normalize_terraform_version(workspace.get_str("attributes.terraform-version"))}),
            )
            .with(
                "vcs",
                json!({
                    "branch": attr(workspace, "attributes.vcs-repo.branch"),
                    "namespace": namespace,
                    "project_root": attr(workspace, "attributes.working-directory"),
                    "provider": provider,
                    "repository": repository,
                }),
            );
        stacks.push(with_space(stack, workspace));
    }
    Ok(stacks)
}

fn map_modules(raw: &RawGraph) -> Result<Vec<Entity>> {
    let mut modules = Vec::new();
    for module in raw.collection(source::MODULES) {
        let (namespace, repository) = repository(module)?;
        // Registry modules do not always report their VCS host; GitHub is the fallback.
        let provider = match collapse_vcs_provider(module.get_str("attributes.vcs-repo.service-provider"))? {
            Some(provider) => Value::from(provider),
            None if !repository.is_null() => Value::from("github_custom"),
            None => Value::Null,
        };

        let entity = Entity::new(source_id(module))
            .with("name", attr(module, "attributes.name"))
            .with("status", attr(module, "attributes.status"))
            .with("terraform_provider", attr(module, "attributes.provider"))
            .with("visibility", attr(module, "attributes.registry-name"))
            .with(
                "vcs",
                json!({
                    "branch": attr(module, "attributes.vcs-repo.branch"),
                    "namespace": namespace,
                    "provider": provider,
                    "repository": repository,
                }),
            );
        modules.push(with_space(entity, module));
    }
    Ok(modules)
}

/// Fields shared by stack and context variables
fn variable_entity(variable: &Record) -> Entity {
    let name = variable.get_str("attributes.key").unwrap_or_default();
    let kind = if variable.get_str("attributes.category") == Some("terraform") {
        "terraform"
    } else {
        "env_var"
    };
    Entity::new(source_id(variable))
        .with("description", attr(variable, "attributes.description"))
        .with("hcl", attr(variable, "attributes.hcl"))
        .with("name", name)
        .with("type", kind)
        .with("valid_name", is_valid_env_var_name(name))
        .with("value", attr(variable, "attributes.value"))
        .with("write_only", variable.get_bool("attributes.sensitive"))
}

fn map_stack_variables(raw: &RawGraph) -> Result<Vec<Entity>> {
    let mut variables = Vec::new();
    for variable in raw.collection(source::WORKSPACE_VARIABLES) {
        let workspace_id = variable.related_id("workspace").unwrap_or_default();
        let unresolved = || MigrationError::UnresolvedRelationship {
            collection: target::STACK_VARIABLES.to_string(),
            relation: "stack".to_string(),
            source_id: workspace_id.to_string(),
        };
        let workspace = raw.find(source::WORKSPACES, workspace_id).ok_or_else(unresolved)?;
        let space = organization_relation(workspace).ok_or_else(unresolved)?;

        variables.push(
            variable_entity(variable)
                .with_relation("space", space)
                .with_relation("stack", Relation::one(workspace_id)),
        );
    }
    Ok(variables)
}

fn map_contexts(raw: &RawGraph) -> Vec<Entity> {
    let workspaces = raw.collection(source::WORKSPACES);

    raw.collection(source::VARIABLE_SETS)
        .iter()
        .map(|variable_set| {
            let global = variable_set.get_bool("attributes.global");
            let labels: Vec<&str> = if global { vec![AUTOATTACH_LABEL] } else { Vec::new() };

            let mut seen = HashSet::new();
            let mut stacks: Vec<&str> = Vec::new();
            if !global {
                let attached = variable_set
                    .related_ids("workspaces")
                    .into_iter()
                    .filter(|id| raw.find(source::WORKSPACES, id).is_some());
                let projects = variable_set.related_ids("projects");
                let via_projects = workspaces
                    .iter()
                    .filter(|workspace| {
                        workspace
                            .related_id("project")
                            .is_some_and(|project| projects.contains(&project))
                    })
                    .filter_map(Record::id);
                for id in attached.chain(via_projects) {
                    if seen.insert(id) {
                        stacks.push(id);
                    }
                }
            }

            let context = Entity::new(source_id(variable_set))
                .with("name", attr(variable_set, "attributes.name"))
                .with("description", attr(variable_set, "attributes.description"))
                .with("labels", labels)
                .with_relation("stacks", Relation::many(stacks));
            with_space(context, variable_set)
        })
        .collect()
}

fn map_context_variables(raw: &RawGraph) -> Vec<Entity> {
    raw.collection(source::VARIABLE_SET_VARIABLES)
        .iter()
        .filter_map(|variable| {
            let variable_set_id = variable.related_id("varset")?;
            Some(variable_entity(variable).with_relation("context", Relation::one(variable_set_id)))
        })
        .collect()
}
