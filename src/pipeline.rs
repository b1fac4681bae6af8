//! Stage orchestration
//!
//! Every stage reads and writes the snapshot files under the work directory,
//! so stages can run as separate invocations.

use crate::codegen::Generator;
use crate::config::SpacemkConfig;
use crate::error::Result;
use crate::filter::GraphFilter;
use crate::graph::EntityGraph;
use crate::source::audit::{save_workbook, AuditReport};
use crate::source::Exporter;
use std::path::PathBuf;
use tracing::info;

/// Extract and check the source data, persisting the annotated raw graph
pub fn audit(config: &SpacemkConfig, exporter: &dyn Exporter) -> Result<AuditReport> {
    let graph = exporter.audit()?;
    graph.save(&config.audit_path())?;
    save_workbook(&graph, &config.report_path())?;
    Ok(AuditReport::from_graph(&graph))
}

/// Export, filter and persist the normalized graph
pub fn export(config: &SpacemkConfig, exporter: &dyn Exporter) -> Result<EntityGraph> {
    let filter = GraphFilter::from_config(&config.filter)?;
    let mapped = exporter.export()?;
    let graph = filter.apply(&mapped);
    graph.save(&config.data_path())?;
    Ok(graph)
}

/// Render the persisted normalized graph
pub fn generate(config: &SpacemkConfig, generator: &dyn Generator) -> Result<Vec<PathBuf>> {
    let graph = EntityGraph::load(&config.data_path())?;
    generator.generate(&graph)
}

/// Export then generate
pub fn migrate(config: &SpacemkConfig, exporter: &dyn Exporter, generator: &dyn Generator) -> Result<Vec<PathBuf>> {
    info!("Start migrating");
    export(config, exporter)?;
    let written = generate(config, generator)?;
    info!("Stop migrating");
    Ok(written)
}
