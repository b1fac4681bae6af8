//! Code Generation
//!
//! Renders the normalized graph to target-platform configuration through a
//! named template set, then optionally formats and validates the output with
//! an external tool.
//!
//! Architecture:
//! - [`templates`]: strict environment, template lookup, helper functions
//! - [`Generator`]: what the registry hands out for a configured name
//! - [`TemplateGenerator`]: renders `<name>/main.tf.jinja` to `main.tf`

pub mod templates;

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::graph::schema::target;
use crate::graph::EntityGraph;
use minijinja::Environment;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

// =============================================================================
// Generator
// =============================================================================

/// Turns a normalized graph into source files
pub trait Generator {
    /// Render the graph and return the written files
    fn generate(&self, graph: &EntityGraph) -> Result<Vec<PathBuf>>;
}

/// Template-driven generator
pub struct TemplateGenerator {
    config: GeneratorConfig,
    env: Environment<'static>,
}

impl TemplateGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        let env = templates::environment(config.template_dir.as_deref());
        Self { config, env }
    }

    fn template_name(&self) -> String {
        format!("{}/main.tf.jinja", self.config.name)
    }

    /// Render context: every target collection plus `extra_vars`
    fn context(&self, graph: &EntityGraph) -> Result<Value> {
        let mut context = Map::new();
        for collection in target::ALL {
            context.insert(
                collection.to_string(),
                serde_json::to_value(graph.collection(collection))?,
            );
        }
        context.insert(
            "extra_vars".to_string(),
            serde_json::to_value(&self.config.extra_vars)?,
        );
        Ok(Value::Object(context))
    }

    /// Render without touching the filesystem
    pub fn render(&self, graph: &EntityGraph) -> Result<String> {
        let name = self.template_name();
        debug!(template = %name, "Rendering template");
        let template = self.env.get_template(&name)?;
        Ok(template.render(self.context(graph)?)?)
    }
}

impl Generator for TemplateGenerator {
    fn generate(&self, graph: &EntityGraph) -> Result<Vec<PathBuf>> {
        info!("Start generating code");
        let content = self.render(graph)?;

        let dir = &self.config.output_dir;
        fs::create_dir_all(dir)?;
        let path = dir.join("main.tf");
        fs::write(&path, content)?;
        info!(path = %path.display(), "Wrote generated code");

        if self.config.format {
            run_tool(&self.config.tool, "fmt", dir);
        }
        if self.config.validate {
            run_tool(&self.config.tool, "validate", dir);
        }

        info!("Stop generating code");
        Ok(vec![path])
    }
}

// =============================================================================
// Post-processing
// =============================================================================

/// Run `<tool> <subcommand>` in `dir`; absence or failure is only a warning
fn run_tool(tool: &str, subcommand: &str, dir: &Path) -> bool {
    let Ok(binary) = which::which(tool) else {
        warn!(tool, "Cannot find '{tool}' on PATH, skipping '{subcommand}'");
        return false;
    };

    match Command::new(binary).arg(subcommand).current_dir(dir).output() {
        Ok(output) if output.status.success() => {
            debug!(tool, subcommand, "Post-processing succeeded");
            true
        }
        Ok(output) => {
            warn!(
                tool,
                subcommand,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Post-processing failed"
            );
            false
        }
        Err(e) => {
            warn!(tool, subcommand, error = %e, "Cannot run post-processing");
            false
        }
    }
}
