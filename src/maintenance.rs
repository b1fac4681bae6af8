//! Post-migration maintenance: module version sync and VCS rewrites

use crate::config::GithubConfig;
use crate::error::{MigrationError, Result};
use crate::graph::schema::target;
use crate::graph::{self, EntityGraph};
use crate::http::{truncate, HttpRequest, Method, ReqwestTransport, Transport};
use crate::mapping::expand_relationships;
use crate::target::spacelift::{module_id, SpaceliftClient};
use crate::target::PushSummary;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// GitHub tags
// =============================================================================

#[derive(Debug, Deserialize)]
struct GithubTag {
    name: String,
    commit: GithubCommit,
}

#[derive(Debug, Deserialize)]
struct GithubCommit {
    sha: String,
}

/// Read-only GitHub REST client
pub struct GithubClient {
    endpoint: String,
    token: Option<String>,
    transport: Arc<dyn Transport>,
}

impl GithubClient {
    pub fn new(endpoint: &str, token: Option<&str>, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
            transport,
        }
    }

    pub fn from_config(config: &GithubConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(30))?;
        Ok(Self::new(&config.endpoint, config.api_token.as_deref(), Arc::new(transport)))
    }

    /// Tag name (without a leading `v`) to commit SHA
    pub fn repository_tags(&self, namespace: &str, repository: &str) -> Result<BTreeMap<String, String>> {
        let path = format!("/repos/{namespace}/{repository}/tags?per_page=100");
        let mut request = HttpRequest::new(Method::Get, format!("{}{path}", self.endpoint))
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer(token);
        }

        let response = self.transport.send(&request).map_err(|e| e.into_error(&path))?;
        if !response.is_success() {
            return Err(MigrationError::Http {
                path,
                status: response.status,
                message: truncate(&response.body, 500),
            });
        }
        let tags: Vec<GithubTag> =
            serde_json::from_str(&response.body).map_err(|e| MigrationError::UnexpectedResponse {
                path: path.clone(),
                message: e.to_string(),
            })?;
        debug!(namespace, repository, count = tags.len(), "Fetched repository tags");

        Ok(tags
            .into_iter()
            .map(|tag| {
                let version = tag.name.strip_prefix('v').unwrap_or(&tag.name).to_string();
                (version, tag.commit.sha)
            })
            .collect())
    }
}

/// Register every repository tag of every module as a Spacelift module version
pub fn create_module_versions(
    graph: &EntityGraph,
    github: &GithubClient,
    spacelift: &SpaceliftClient,
) -> Result<PushSummary> {
    info!("Start creating module versions");
    let modules = graph.collection(target::MODULES);
    if modules.is_empty() {
        warn!("No modules found. Skipping.");
    }

    let mut total = PushSummary::default();
    for module in modules {
        let name = module.name().unwrap_or_default();
        let (Some(namespace), Some(repository)) =
            (module.str_field("vcs.namespace"), module.str_field("vcs.repository"))
        else {
            warn!("Module '{name}' has no repository information. Skipping.");
            total.skipped += 1;
            continue;
        };
        let Some(id) = module_id(module) else {
            warn!("Module '{name}' has no Terraform provider. Skipping.");
            total.skipped += 1;
            continue;
        };

        let tags = github.repository_tags(namespace, repository)?;
        let summary = spacelift.create_module_versions(&id, &tags)?;
        total.pushed += summary.pushed;
        total.skipped += summary.skipped;
        total.failed += summary.failed;
    }
    info!(summary = ?total, "Stop creating module versions");
    Ok(total)
}

// =============================================================================
// VCS configuration rewrite
// =============================================================================

/// One row of the VCS configuration CSV
#[derive(Debug, Clone, Deserialize)]
pub struct VcsRow {
    #[serde(rename = "WorkspaceName")]
    pub workspace_name: String,
    #[serde(rename = "ProjectRoot", default)]
    pub project_root: Option<String>,
    #[serde(rename = "Branch", default)]
    pub branch: Option<String>,
    #[serde(rename = "Namespace", default)]
    pub namespace: Option<String>,
    #[serde(rename = "RepoName", default)]
    pub repository: Option<String>,
    #[serde(rename = "VCSProvider", default)]
    pub provider: Option<String>,
}

pub fn read_vcs_rows(path: &Path) -> Result<Vec<VcsRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<VcsRow>, _>>()?;
    Ok(rows)
}

/// `/root/` form used by rewritten stacks; `None` for an empty root
fn project_root(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{trimmed}/"))
    }
}

fn non_empty(value: &Option<String>) -> Value {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or(Value::Null, Value::from)
}

/// Rewrite the VCS block of each stack with a matching row
///
/// Returns the number of updated stacks. Embedded stack snapshots are
/// refreshed afterwards.
pub fn apply_vcs_rows(graph: &mut EntityGraph, rows: &[VcsRow]) -> Result<usize> {
    let mut updated = 0;
    for stack in graph.collection_mut(target::STACKS).iter_mut() {
        let name = stack.name().unwrap_or_default().to_string();
        let Some(row) = rows.iter().find(|row| row.workspace_name == name) else {
            warn!("No VCS configuration found for the '{name}' stack. Skipping.");
            continue;
        };

        let mut vcs = match stack.fields.remove("vcs") {
            Some(Value::Object(vcs)) => vcs,
            _ => Map::new(),
        };
        vcs.insert("branch".to_string(), non_empty(&row.branch));
        vcs.insert("namespace".to_string(), non_empty(&row.namespace));
        vcs.insert(
            "project_root".to_string(),
            project_root(row.project_root.as_deref()).map_or(Value::Null, Value::from),
        );
        vcs.insert("repository".to_string(), non_empty(&row.repository));
        if let Value::String(provider) = non_empty(&row.provider) {
            vcs.insert("provider".to_string(), Value::String(provider));
        }
        stack.fields.insert("vcs".to_string(), Value::Object(vcs));
        updated += 1;
    }

    expand_relationships(graph)?;
    Ok(updated)
}

/// Back up the snapshot, apply the CSV and save it in place
pub fn update_vcs_config(data_path: &Path, csv_path: &Path) -> Result<usize> {
    info!("Start updating VCS configuration");
    let mut graph = EntityGraph::load(data_path)?;
    graph::backup(data_path)?;
    let rows = read_vcs_rows(csv_path)?;
    let updated = apply_vcs_rows(&mut graph, &rows)?;
    graph.save(data_path)?;
    info!(updated, "Stop updating VCS configuration");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, Relation};
    use crate::http::ScriptedTransport;
    use serde_json::json;
    use std::fs;

    fn graph() -> EntityGraph {
        let mut graph = EntityGraph::new();
        graph.insert(target::SPACES, vec![Entity::new("acme").with("name", "acme")]);
        graph.insert(
            target::STACKS,
            vec![
                Entity::new("ws-1")
                    .with("name", "network")
                    .with("vcs", json!({"branch": "main", "namespace": "acme", "project_root": null, "provider": "github_custom", "repository": "infra"}))
                    .with_relation("space", Relation::one("acme")),
                Entity::new("ws-2")
                    .with("name", "app")
                    .with("vcs", json!({"branch": null, "namespace": null, "project_root": null, "provider": null, "repository": null}))
                    .with_relation("space", Relation::one("acme")),
            ],
        );
        graph.insert(
            target::STACK_VARIABLES,
            vec![Entity::new("var-1")
                .with("name", "region")
                .with("type", "terraform")
                .with_relation("space", Relation::one("acme"))
                .with_relation("stack", Relation::one("ws-1"))],
        );
        expand_relationships(&mut graph).unwrap();
        graph
    }

    #[test]
    fn test_repository_tags_strip_v_prefix() {
        let transport = ScriptedTransport::new().json(
            Method::Get,
            "/repos/acme/terraform-aws-vpc/tags?per_page=100",
            json!([
                {"name": "v1.2.0", "commit": {"sha": "abc"}},
                {"name": "0.9.0", "commit": {"sha": "def"}}
            ]),
        );
        let client = GithubClient::new("https://api.github.test/", Some("gh-token"), Arc::new(transport));
        let tags = client.repository_tags("acme", "terraform-aws-vpc").unwrap();
        assert_eq!(tags.get("1.2.0").map(String::as_str), Some("abc"));
        assert_eq!(tags.get("0.9.0").map(String::as_str), Some("def"));
    }

    #[test]
    fn test_repository_tags_http_error() {
        let client = GithubClient::new("https://api.github.test", None, Arc::new(ScriptedTransport::new()));
        assert!(matches!(
            client.repository_tags("acme", "missing"),
            Err(MigrationError::Http { status: 404, .. })
        ));
    }

    #[test]
    fn test_project_root_normalization() {
        assert_eq!(project_root(Some("network")).as_deref(), Some("/network/"));
        assert_eq!(project_root(Some("/a/b/")).as_deref(), Some("/a/b/"));
        assert_eq!(project_root(Some("  ")), None);
        assert_eq!(project_root(None), None);
    }

    #[test]
    fn test_update_vcs_config_rewrites_matching_stacks() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("data.json");
        let csv_path = dir.path().join("vcs_config.csv");
        graph().save(&data_path).unwrap();
        fs::write(
            &csv_path,
            "WorkspaceName,ProjectRoot,Branch,Namespace,RepoName,VCSProvider\nnetwork,stacks/network,develop,platform,monorepo,gitlab\n",
        )
        .unwrap();

        let updated = update_vcs_config(&data_path, &csv_path).unwrap();
        assert_eq!(updated, 1);

        let graph = EntityGraph::load(&data_path).unwrap();
        let stack = graph.find(target::STACKS, "ws-1").unwrap();
        assert_eq!(
            stack.field("vcs"),
            Some(&json!({"branch": "develop", "namespace": "platform", "project_root": "/stacks/network/", "provider": "gitlab", "repository": "monorepo"}))
        );
        let untouched = graph.find(target::STACKS, "ws-2").unwrap();
        assert_eq!(untouched.field("vcs.branch"), Some(&Value::Null));

        // Embedded snapshots follow the rewrite.
        let variable = graph.find(target::STACK_VARIABLES, "var-1").unwrap();
        assert_eq!(variable.related("stack").unwrap().fields["vcs"]["branch"], "develop");

        let backups = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".bak.json"))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn test_missing_provider_column_keeps_provider() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("vcs_config.csv");
        fs::write(&csv_path, "WorkspaceName,ProjectRoot,Branch,Namespace,RepoName\nnetwork,,main,acme,infra2\n").unwrap();

        let mut graph = graph();
        let rows = read_vcs_rows(&csv_path).unwrap();
        apply_vcs_rows(&mut graph, &rows).unwrap();
        let stack = graph.find(target::STACKS, "ws-1").unwrap();
        assert_eq!(stack.str_field("vcs.provider"), Some("github_custom"));
        assert_eq!(stack.str_field("vcs.repository"), Some("infra2"));
        assert_eq!(stack.field("vcs.project_root"), Some(&Value::Null));
    }
}
