//! spacemk: Terraform Cloud/Enterprise to Spacelift migration kit
//!
//! Extracts organizations, workspaces, variables and registry modules from
//! the source API, recovers write-only values, maps everything into a
//! vendor-neutral entity graph and renders Spacelift configuration from it.
//!
//! ## Pipeline
//!
//! ```text
//! source API ──extract──▶ raw graph ──enrich──▶ raw graph
//!                                                  │
//!                                                 map
//!                                                  ▼
//! main.tf ◀──generate── filtered graph ◀──filter── entity graph
//! ```
//!
//! Each stage hands off through a JSON snapshot in the work directory:
//!
//! ```text
//! tmp/
//! ├── audit.json          raw graph with audit warnings
//! ├── data.json           normalized (filtered) graph
//! ├── state-files/<org>/  downloaded state files
//! └── code/main.tf        generated configuration
//! ```

pub mod codegen;
pub mod config;
pub mod error;
pub mod filter;
pub mod graph;
pub mod http;
pub mod maintenance;
pub mod mapping;
pub mod pattern;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod source;
pub mod target;

pub use codegen::{Generator, TemplateGenerator};
pub use config::SpacemkConfig;
pub use error::{MigrationError, Result};
pub use filter::GraphFilter;
pub use graph::{EntityGraph, RawGraph};
pub use registry::Registry;
pub use source::{Exporter, TerraformExporter};
