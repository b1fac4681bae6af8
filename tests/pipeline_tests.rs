//! Pipeline Tests
//!
//! Drives extract, enrich, map, filter and generate against a scripted
//! source API and checks the persisted snapshot and the rendered output.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

use spacemk::graph::schema::target;
use spacemk::http::{HttpResponse, Method, ScriptedTransport};
use spacemk::maintenance;
use spacemk::source::client::TfcClient;
use spacemk::source::worker::{Worker, WorkerLauncher};
use spacemk::{pipeline, EntityGraph, Exporter, GraphFilter, MigrationError, SpacemkConfig, TemplateGenerator, TerraformExporter};

struct NoDocker;

impl WorkerLauncher for NoDocker {
    fn is_available(&self) -> bool {
        false
    }

    fn launch(&self, _name: &str, _token: &str) -> spacemk::Result<Box<dyn Worker>> {
        Err(MigrationError::Worker("docker is not installed".to_string()))
    }
}

fn fixture(name: &str) -> BTreeMap<String, Value> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn scripted(responses: BTreeMap<String, Value>) -> ScriptedTransport {
    responses
        .into_iter()
        .fold(ScriptedTransport::new(), |transport, (suffix, body)| transport.json(Method::Get, &suffix, body))
}

fn config(dir: &TempDir) -> SpacemkConfig {
    let mut config = SpacemkConfig::default();
    config.work_dir = dir.path().to_path_buf();
    config.generator.output_dir = dir.path().join("code");
    config.generator.format = false;
    config.generator.validate = false;
    config
}

fn exporter(config: &SpacemkConfig, transport: ScriptedTransport) -> TerraformExporter {
    let client = TfcClient::new("https://tfc.test", "token", Arc::new(transport));
    TerraformExporter::with_parts(config, client, Box::new(NoDocker))
}

fn names(graph: &EntityGraph, collection: &str) -> Vec<String> {
    graph
        .collection(collection)
        .iter()
        .filter_map(|entity| entity.name().map(str::to_string))
        .collect()
}

// =============================================================================
// Export
// =============================================================================

#[test]
fn test_export_persists_normalized_graph() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let graph = pipeline::export(&config, &exporter(&config, scripted(fixture("tfc_acme.json")))).unwrap();

    assert!(config.data_path().exists());
    assert_eq!(EntityGraph::load(&config.data_path()).unwrap(), graph);

    assert_eq!(names(&graph, target::SPACES), vec!["acme"]);
    assert_eq!(names(&graph, target::STACKS), vec!["network", "legacy"]);
    assert_eq!(names(&graph, target::MODULES), vec!["vpc"]);
    assert_eq!(names(&graph, target::CONTEXTS), vec!["shared", "legacy-only"]);

    let network = graph.find(target::STACKS, "ws-1").unwrap();
    assert_eq!(network.migration_id.as_deref(), Some("network"));
    assert_eq!(network.field("terraform"), Some(&json!({"version": "1.5.0"})));
    assert_eq!(network.field("vcs").and_then(|vcs| vcs.get("provider")), Some(&json!("github_custom")));
    assert!(network.bool_field("has_variables_with_invalid_name"));
    assert!(!network.bool_field("has_secret_variables_with_invalid_name"));

    let module = graph.find(target::MODULES, "mod-1").unwrap();
    assert_eq!(module.migration_id.as_deref(), Some("vpc_aws"));
    assert_eq!(module.field("vcs").and_then(|vcs| vcs.get("provider")), Some(&json!("github_custom")));
}

#[test]
fn test_export_without_docker_keeps_secrets_unset() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let graph = pipeline::export(&config, &exporter(&config, scripted(fixture("tfc_acme.json")))).unwrap();

    let secret = graph.find(target::STACK_VARIABLES, "var-2").unwrap();
    assert!(secret.bool_field("write_only"));
    assert_eq!(secret.field("value"), Some(&Value::Null));
}

#[test]
fn test_organization_without_workspaces() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let transport = ScriptedTransport::new().json(
        Method::Get,
        "/organizations",
        json!({"data": [{"id": "empty", "attributes": {"name": "empty"}}]}),
    );

    let graph = pipeline::export(&config, &exporter(&config, transport)).unwrap();
    assert_eq!(names(&graph, target::SPACES), vec!["empty"]);
    assert!(graph.collection(target::STACKS).is_empty());
    assert!(graph.collection(target::STACK_VARIABLES).is_empty());
}

#[test]
fn test_source_failure_leaves_no_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let mut responses = fixture("tfc_acme.json");
    responses.remove("/organizations/acme/workspaces");
    let transport = scripted(responses).on(
        Method::Get,
        "/organizations/acme/workspaces",
        Ok(HttpResponse::new(500, "boom")),
    );

    assert!(pipeline::export(&config, &exporter(&config, transport)).is_err());
    assert!(!config.data_path().exists());
}

#[test]
fn test_audit_reports_without_mapping() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let report = pipeline::audit(&config, &exporter(&config, scripted(fixture("tfc_acme.json")))).unwrap();

    assert!(config.audit_path().exists());
    assert!(config.report_path().exists());
    let lines = report.lines();
    assert!(lines.contains(&"Workspaces: 2 (including 1 with warnings)".to_string()));
    assert!(lines.contains(&"Workspace Variables: 3 (including 1 with warnings)".to_string()));
    assert!(lines.contains(&"Modules: 1".to_string()));
}

// =============================================================================
// Filter
// =============================================================================

#[test]
fn test_include_all_filter_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let graph = exporter(&config, scripted(fixture("tfc_acme.json"))).export().unwrap();

    assert_eq!(GraphFilter::include_all().apply(&graph), graph);
}

#[test]
fn test_stack_filter_cascades_on_export() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.filter.patterns.insert("stacks".to_string(), "network".to_string());

    let graph = pipeline::export(&config, &exporter(&config, scripted(fixture("tfc_acme.json")))).unwrap();

    assert_eq!(names(&graph, target::STACKS), vec!["network"]);
    assert!(graph
        .collection(target::STACK_VARIABLES)
        .iter()
        .all(|variable| variable.related_id("stack") == Some("ws-1")));
    // The global context stays, the one attached only to `legacy` goes with its variables.
    assert_eq!(names(&graph, target::CONTEXTS), vec!["shared"]);
    assert_eq!(names(&graph, target::CONTEXT_VARIABLES), vec!["LOG_LEVEL"]);
    assert_eq!(names(&graph, target::SPACES), vec!["acme"]);
}

// =============================================================================
// Generate
// =============================================================================

#[test]
fn test_migrate_renders_configuration() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let exporter = exporter(&config, scripted(fixture("tfc_acme.json")));
    let generator = TemplateGenerator::new(config.generator.clone());

    let written = pipeline::migrate(&config, &exporter, &generator).unwrap();
    assert_eq!(written, vec![dir.path().join("code").join("main.tf")]);

    let code = fs::read_to_string(&written[0]).unwrap();
    assert!(code.contains(r#"resource "spacelift_space" "acme""#));
    assert!(code.contains(r#"resource "spacelift_stack" "network""#));
    assert!(code.contains(r#"project_root      = "envs/prod""#));
    assert!(code.contains("github_enterprise {"));
    assert!(code.contains(r#"name       = "TF_VAR_region""#));
    assert!(code.contains(r#"resource "spacelift_module" "vpc_aws""#));
    assert!(code.contains(r#"resource "spacelift_context" "shared""#));
    assert!(code.contains(r#"["autoattach:*"]"#));

    // No repository, invalid name, write-only
    assert!(!code.contains(r#"resource "spacelift_stack" "legacy""#));
    assert!(!code.contains("my-var"));
    assert!(!code.contains("AWS_SECRET_ACCESS_KEY"));
}

#[test]
fn test_generate_requires_exported_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let generator = TemplateGenerator::new(config.generator.clone());

    assert!(pipeline::generate(&config, &generator).is_err());
}

// =============================================================================
// Maintenance
// =============================================================================

#[test]
fn test_update_vcs_config_rewrites_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    pipeline::export(&config, &exporter(&config, scripted(fixture("tfc_acme.json")))).unwrap();

    let csv_path = dir.path().join("vcs_config.csv");
    fs::write(
        &csv_path,
        "WorkspaceName,ProjectRoot,Branch,Namespace,RepoName,VCSProvider\nlegacy,apps/legacy,trunk,acme,monorepo,gitlab\n",
    )
    .unwrap();

    let updated = maintenance::update_vcs_config(&config.data_path(), &csv_path).unwrap();
    assert_eq!(updated, 1);

    let graph = EntityGraph::load(&config.data_path()).unwrap();
    let legacy = graph.find(target::STACKS, "ws-2").unwrap();
    assert_eq!(
        legacy.field("vcs"),
        Some(&json!({
            "branch": "trunk",
            "namespace": "acme",
            "project_root": "/apps/legacy/",
            "provider": "gitlab",
            "repository": "monorepo"
        }))
    );
    let untouched = graph.find(target::STACKS, "ws-1").unwrap();
    assert_eq!(untouched.field("vcs").and_then(|vcs| vcs.get("branch")), Some(&json!("main")));

    let backups = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".bak.json"))
        .count();
    assert_eq!(backups, 1);
}
