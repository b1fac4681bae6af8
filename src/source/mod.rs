//! Source platform (Terraform Cloud/Enterprise) export
//!
//! - [`client`]: paginated REST access
//! - [`extract`]: per-resource extraction into the raw graph
//! - [`audit`]: data checks on the raw graph
//! - [`enrich`] / [`worker`]: write-only value recovery
//! - [`state`]: current state file download

pub mod audit;
pub mod client;
pub mod enrich;
pub mod extract;
pub mod state;
pub mod worker;

use crate::config::{ExporterConfig, SpacemkConfig};
use crate::error::Result;
use crate::graph::{EntityGraph, RawGraph};
use crate::mapping::map_graph;
use client::TfcClient;
use enrich::{PollSettings, SecretEnricher};
use extract::{Extractor, IncludePatterns};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use worker::{DockerLauncher, WorkerLauncher};

/// Produces graphs from a source platform
pub trait Exporter {
    /// Extract the raw graph and annotate it with audit warnings
    fn audit(&self) -> Result<RawGraph>;

    /// Extract, enrich and map to the normalized graph
    fn export(&self) -> Result<EntityGraph>;
}

/// Terraform Cloud/Enterprise exporter
pub struct TerraformExporter {
    config: ExporterConfig,
    client: TfcClient,
    launcher: Box<dyn WorkerLauncher>,
    state_dir: PathBuf,
}

impl TerraformExporter {
    pub fn new(config: &SpacemkConfig) -> Result<Self> {
        let client = TfcClient::from_config(&config.exporter)?;
        let launcher = Box::new(DockerLauncher::new(config.exporter.agent_image.clone()));
        Ok(Self::with_parts(config, client, launcher))
    }

    /// Build from explicit collaborators
    pub fn with_parts(config: &SpacemkConfig, client: TfcClient, launcher: Box<dyn WorkerLauncher>) -> Self {
        Self {
            config: config.exporter.clone(),
            client,
            launcher,
            state_dir: config.state_files_dir(),
        }
    }

    fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.config.plan_poll_interval_secs),
            timeout: Duration::from_secs(self.config.plan_timeout_secs),
        }
    }

    /// Raw graph straight from the API
    pub fn extract(&self) -> Result<RawGraph> {
        let include = IncludePatterns::new(&self.config.include)?;
        Extractor::new(&self.client, &include).extract()
    }

    /// Recover write-only values in place; returns the recovered count
    pub fn enrich(&self, graph: &mut RawGraph) -> usize {
        if !self.config.enrich_sensitive_values {
            warn!("Sensitive value enrichment is disabled. Write-only values stay unset.");
            return 0;
        }
        SecretEnricher::new(&self.client, self.launcher.as_ref(), self.poll_settings()).enrich(graph)
    }
}

impl Exporter for TerraformExporter {
    fn audit(&self) -> Result<RawGraph> {
        let mut graph = self.extract()?;
        audit::check(&mut graph);
        Ok(graph)
    }

    fn export(&self) -> Result<EntityGraph> {
        info!("Start exporting data");
        let mut raw = self.extract()?;
        if self.config.download_state_files {
            state::download_state_files(&self.client, &raw, &self.state_dir);
        }
        self.enrich(&mut raw);
        let graph = map_graph(&raw)?;
        info!("Stop exporting data");
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use crate::graph::schema::target;
    use crate::http::{Method, ScriptedTransport};
    use serde_json::json;
    use std::sync::Arc;

    struct NoDocker;

    impl WorkerLauncher for NoDocker {
        fn is_available(&self) -> bool {
            false
        }

        fn launch(&self, _name: &str, _token: &str) -> Result<Box<dyn worker::Worker>> {
            Err(MigrationError::Worker("docker is not installed".to_string()))
        }
    }

    fn transport() -> ScriptedTransport {
        ScriptedTransport::new()
            .json(Method::Get, "/organizations", json!({"data": [{"id": "acme", "attributes": {"name": "acme"}}]}))
            .json(
                Method::Get,
                "/organizations/acme/workspaces",
                json!({"data": [{
                    "id": "ws-1",
                    "attributes": {"name": "network", "resource-count": 0},
                    "relationships": {"organization": {"data": {"id": "acme"}}}
                }]}),
            )
            .json(
                Method::Get,
                "/workspaces/ws-1/vars",
                json!({"data": [{"id": "var-1", "attributes": {"key": "TOKEN", "category": "env", "sensitive": true}}]}),
            )
    }

    fn exporter(transport: ScriptedTransport) -> TerraformExporter {
        let client = TfcClient::new("https://tfc.test", "token", Arc::new(transport));
        TerraformExporter::with_parts(&SpacemkConfig::default(), client, Box::new(NoDocker))
    }

    #[test]
    fn test_export_without_docker_leaves_secrets_unset() {
        let graph = exporter(transport()).export().unwrap();
        assert_eq!(graph.collection(target::STACKS).len(), 1);
        let variable = graph.find(target::STACK_VARIABLES, "var-1").unwrap();
        assert!(variable.bool_field("write_only"));
        assert_eq!(variable.field("value"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn test_audit_annotates_records() {
        let graph = exporter(transport()).audit().unwrap();
        let workspace = graph.find(crate::graph::schema::source::WORKSPACES, "ws-1").unwrap();
        assert!(workspace.warnings().contains(&"No resources"));
    }
}
