//! Per-resource extraction from the source platform
//!
//! Each resource type declares the dotted properties it needs and the path it
//! is scoped under. Organizations come first; everything else is scoped to an
//! organization, except workspace variables (scoped to a workspace) and
//! variable set variables (scoped to a variable set).

use super::client::{FetchRequest, TfcClient};
use crate::error::Result;
use crate::graph::schema::source;
use crate::graph::RawGraph;
use crate::pattern::NamePattern;
use crate::record::Record;
use std::collections::BTreeMap;
use tracing::info;

const ORGANIZATION_PROPERTIES: &[&str] = &["attributes.email", "attributes.name", "id"];

const AGENT_POOL_PROPERTIES: &[&str] = &[
    "attributes.agent-count",
    "attributes.name",
    "attributes.organization-scoped",
    "id",
    "relationships.organization.data.id",
];

const MODULE_LIST_PROPERTIES: &[&str] = &[
    "attributes.name",
    "attributes.namespace",
    "attributes.provider",
    "attributes.registry-name",
    "id",
];

const MODULE_PROPERTIES: &[&str] = &[
    "attributes.name",
    "attributes.namespace",
    "attributes.provider",
    "attributes.registry-name",
    "attributes.status",
    "attributes.vcs-repo.branch",
    "attributes.vcs-repo.identifier",
    "attributes.vcs-repo.service-provider",
    "id",
    "relationships.organization.data.id",
];

const POLICY_PROPERTIES: &[&str] = &[
    "attributes.description",
    "attributes.enforcement-level",
    "attributes.kind",
    "attributes.name",
    "id",
    "relationships.organization.data.id",
];

const POLICY_SET_PROPERTIES: &[&str] = &[
    "attributes.description",
    "attributes.global",
    "attributes.kind",
    "attributes.name",
    "id",
    "relationships.organization.data.id",
];

const PROJECT_PROPERTIES: &[&str] = &[
    "attributes.name",
    "id",
    "relationships.organization.data.id",
];

const PROVIDER_PROPERTIES: &[&str] = &[
    "attributes.name",
    "attributes.namespace",
    "attributes.registry-name",
    "id",
    "relationships.organization.data.id",
];

const TASK_PROPERTIES: &[&str] = &[
    "attributes.category",
    "attributes.description",
    "attributes.enabled",
    "attributes.name",
    "attributes.url",
    "id",
    "relationships.organization.data.id",
];

const TEAM_PROPERTIES: &[&str] = &[
    "attributes.name",
    "attributes.users-count",
    "id",
    "relationships.organization.data.id",
];

const VARIABLE_SET_PROPERTIES: &[&str] = &[
    "attributes.description",
    "attributes.global",
    "attributes.name",
    "attributes.project-count",
    "attributes.var-count",
    "attributes.workspace-count",
    "id",
    "relationships.organization.data.id",
    "relationships.projects.data",
    "relationships.workspaces.data",
];

const VARIABLE_PROPERTIES: &[&str] = &[
    "attributes.category",
    "attributes.description",
    "attributes.hcl",
    "attributes.key",
    "attributes.sensitive",
    "attributes.value",
    "id",
    "relationships.workspace.data.id",
    "relationships.varset.data.id",
];

const WORKSPACE_PROPERTIES: &[&str] = &[
    "attributes.auto-apply",
    "attributes.description",
    "attributes.name",
    "attributes.resource-count",
    "attributes.terraform-version",
    "attributes.vcs-repo.branch",
    "attributes.vcs-repo.identifier",
    "attributes.vcs-repo.service-provider",
    "attributes.working-directory",
    "id",
    "relationships.current-configuration-version.data.id",
    "relationships.current-state-version.data.id",
    "relationships.organization.data.id",
    "relationships.project.data.id",
];

/// Organization-scoped resources without extra handling: (path segment, collection, properties)
const ORGANIZATION_RESOURCES: &[(&str, &str, &[&str])] = &[
    ("policies", source::POLICIES, POLICY_PROPERTIES),
    ("policy-sets", source::POLICY_SETS, POLICY_SET_PROPERTIES),
    ("projects", source::PROJECTS, PROJECT_PROPERTIES),
    ("registry-providers", source::PROVIDERS, PROVIDER_PROPERTIES),
    ("tasks", source::TASKS, TASK_PROPERTIES),
    ("teams", source::TEAMS, TEAM_PROPERTIES),
];

/// Include patterns per source collection
#[derive(Debug, Clone, Default)]
pub struct IncludePatterns {
    patterns: BTreeMap<String, NamePattern>,
    include_all: NamePattern,
}

impl IncludePatterns {
    pub fn new(raw: &BTreeMap<String, String>) -> Result<Self> {
        let patterns = raw
            .iter()
            .map(|(collection, pattern)| Ok((collection.clone(), NamePattern::new(pattern)?)))
            .collect::<Result<_>>()?;
        Ok(Self {
            patterns,
            include_all: NamePattern::include_all(),
        })
    }

    pub fn get(&self, collection: &str) -> &NamePattern {
        self.patterns.get(collection).unwrap_or(&self.include_all)
    }
}

/// Builds the raw graph from the source API
pub struct Extractor<'a> {
    client: &'a TfcClient,
    include: &'a IncludePatterns,
}

impl<'a> Extractor<'a> {
    pub fn new(client: &'a TfcClient, include: &'a IncludePatterns) -> Self {
        Self { client, include }
    }

    /// Extract every collection; any failure aborts the whole extraction
    pub fn extract(&self) -> Result<RawGraph> {
        info!("Start extracting data");
        let mut graph = RawGraph::new();

        let organizations = self.organizations()?;
        for organization in &organizations {
            let Some(org_id) = organization.id() else {
                continue;
            };
            graph.extend(source::AGENT_POOLS, self.agent_pools(org_id)?);
            graph.extend(source::MODULES, self.modules(org_id)?);
            for &(resource, collection, properties) in ORGANIZATION_RESOURCES {
                let records = self.organization_scoped(org_id, resource, collection, properties)?;
                graph.extend(collection, records);
            }
            graph.extend(source::VARIABLE_SETS, self.variable_sets(org_id)?);
            graph.extend(source::WORKSPACES, self.workspaces(org_id)?);
        }
        graph.insert(source::ORGANIZATIONS, organizations);

        let variable_set_ids: Vec<String> = ids(graph.collection(source::VARIABLE_SETS));
        for id in &variable_set_ids {
            let variables = self.variable_set_variables(id)?;
            graph.extend(source::VARIABLE_SET_VARIABLES, variables);
        }

        let workspace_ids: Vec<String> = ids(graph.collection(source::WORKSPACES));
        for id in &workspace_ids {
            let variables = self.workspace_variables(id)?;
            graph.extend(source::WORKSPACE_VARIABLES, variables);
        }

        // Every collection is present, even when empty.
        for name in [
            source::AGENT_POOLS,
            source::MODULES,
            source::POLICIES,
            source::POLICY_SETS,
            source::PROJECTS,
            source::PROVIDERS,
            source::TASKS,
            source::TEAMS,
            source::VARIABLE_SETS,
            source::VARIABLE_SET_VARIABLES,
            source::WORKSPACES,
            source::WORKSPACE_VARIABLES,
        ] {
            graph.collection_mut(name);
        }

        info!(records = graph.len(), "Stop extracting data");
        Ok(graph)
    }

    pub fn organizations(&self) -> Result<Vec<Record>> {
        info!("Extracting organizations");
        self.client.fetch(
            &FetchRequest::get("/organizations", ORGANIZATION_PROPERTIES)
                .include(self.include.get(source::ORGANIZATIONS)),
        )
    }

    pub fn agent_pools(&self, org_id: &str) -> Result<Vec<Record>> {
        self.organization_scoped(org_id, "agent-pools", source::AGENT_POOLS, AGENT_POOL_PROPERTIES)
    }

    /// Registry modules: the list endpoint lacks VCS details, so each module is fetched again
    pub fn modules(&self, org_id: &str) -> Result<Vec<Record>> {
        info!(organization = org_id, "Extracting modules");
        let listed = self.client.fetch(
            &FetchRequest::get(
                format!("/organizations/{org_id}/registry-modules"),
                MODULE_LIST_PROPERTIES,
            )
            .include(self.include.get(source::MODULES)),
        )?;

        let mut modules = Vec::with_capacity(listed.len());
        for item in &listed {
            let path = format!(
                "/organizations/{org_id}/registry-modules/{}/{}/{}/{}",
                item.get_str("attributes.registry-name").unwrap_or_default(),
                item.get_str("attributes.namespace").unwrap_or_default(),
                item.get_str("attributes.name").unwrap_or_default(),
                item.get_str("attributes.provider").unwrap_or_default(),
            );
            let fetched = self.client.fetch_one(&FetchRequest::get(path, MODULE_PROPERTIES))?;
            if let Some(mut module) = fetched {
                if !module.has("relationships.organization.data.id") {
                    module.set("relationships.organization.data.id", org_id.into());
                }
                modules.push(module);
            }
        }
        Ok(modules)
    }

    pub fn variable_sets(&self, org_id: &str) -> Result<Vec<Record>> {
        self.organization_scoped(org_id, "varsets", source::VARIABLE_SETS, VARIABLE_SET_PROPERTIES)
    }

    pub fn workspaces(&self, org_id: &str) -> Result<Vec<Record>> {
        self.organization_scoped(org_id, "workspaces", source::WORKSPACES, WORKSPACE_PROPERTIES)
    }

    pub fn workspace_variables(&self, workspace_id: &str) -> Result<Vec<Record>> {
        info!(workspace = workspace_id, "Extracting workspace variables");
        let mut variables = self.client.fetch(
            &FetchRequest::get(format!("/workspaces/{workspace_id}/vars"), VARIABLE_PROPERTIES)
                .include(self.include.get(source::WORKSPACE_VARIABLES)),
        )?;
        for variable in &mut variables {
            if !variable.has("relationships.workspace.data.id") {
                variable.set("relationships.workspace.data.id", workspace_id.into());
            }
        }
        Ok(variables)
    }

    pub fn variable_set_variables(&self, variable_set_id: &str) -> Result<Vec<Record>> {
        info!(variable_set = variable_set_id, "Extracting variable set variables");
        let mut variables = self.client.fetch(
            &FetchRequest::get(
                format!("/varsets/{variable_set_id}/relationships/vars"),
                VARIABLE_PROPERTIES,
            )
            .include(self.include.get(source::VARIABLE_SET_VARIABLES)),
        )?;
        for variable in &mut variables {
            if !variable.has("relationships.varset.data.id") {
                variable.set("relationships.varset.data.id", variable_set_id.into());
            }
        }
        Ok(variables)
    }

    fn organization_scoped(
        &self,
        org_id: &str,
        resource: &str,
        collection: &str,
        properties: &[&str],
    ) -> Result<Vec<Record>> {
        info!(organization = org_id, collection, "Extracting");
        let mut records = self.client.fetch(
            &FetchRequest::get(format!("/organizations/{org_id}/{resource}"), properties)
                .include(self.include.get(collection)),
        )?;
        for record in &mut records {
            if !record.has("relationships.organization.data.id") {
                record.set("relationships.organization.data.id", org_id.into());
            }
        }
        Ok(records)
    }
}

fn ids(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.id().map(str::to_string))
        .collect()
}
