//! spacemk CLI
//!
//! Audits a Terraform Cloud/Enterprise setup, exports it to a normalized
//! graph, generates Spacelift configuration and runs post-migration pushes.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use spacemk::maintenance::{self, GithubClient};
use spacemk::target::SpaceliftClient;
use spacemk::{pipeline, EntityGraph, Registry, SpacemkConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spacemk")]
#[command(about = "Migrate Terraform Cloud/Enterprise organizations to Spacelift")]
#[command(version)]
struct Cli {
    /// Config file to load in addition to the default locations
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit the source vendor setup
    Audit,

    /// Export data from the source vendor to the work directory
    Export,

    /// Generate Terraform code to manage Spacelift entities
    Generate,

    /// Export then generate
    Migrate,

    /// Set sensitive environment variable values in Spacelift
    SetSensitiveEnvVars,

    /// Set values of Terraform variables with invalid names in Spacelift
    SetTfVarsWithInvalidName,

    /// Create Spacelift module versions from repository tags
    CreateModuleVersions,

    /// Update stacks VCS configuration from a CSV file
    UpdateVcsConfig {
        /// CSV with WorkspaceName,ProjectRoot,Branch,Namespace,RepoName[,VCSProvider]
        #[arg(long, default_value = "vcs_config.csv")]
        path: PathBuf,
    },

    /// View and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },

    /// Write a config file with default values
    Init {
        #[arg(short, long, default_value = "spacemk.toml")]
        output: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("The command failed: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &SpacemkConfig, verbose: u8) {
    let level = match verbose {
        0 => config.log_level.as_str(),
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = SpacemkConfig::load_from(cli.config.as_deref()).context("cannot load configuration")?;
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Audit => {
            let exporter = Registry::exporters().create(&config)?;
            let report = pipeline::audit(&config, exporter.as_ref())?;
            for line in report.lines() {
                println!("{line}");
            }
            println!(
                "\nDetails saved to {} and {}",
                config.audit_path().display(),
                config.report_path().display()
            );
        }

        Commands::Export => {
            let exporter = Registry::exporters().create(&config)?;
            let graph = pipeline::export(&config, exporter.as_ref())?;
            println!("Exported {} records to {}", graph.len(), config.data_path().display());
        }

        Commands::Generate => {
            let generator = Registry::generators().create(&config)?;
            for path in pipeline::generate(&config, generator.as_ref())? {
                println!("Generated {}", path.display());
            }
        }

        Commands::Migrate => {
            let exporter = Registry::exporters().create(&config)?;
            let generator = Registry::generators().create(&config)?;
            for path in pipeline::migrate(&config, exporter.as_ref(), generator.as_ref())? {
                println!("Generated {}", path.display());
            }
        }

        Commands::SetSensitiveEnvVars => {
            let graph = EntityGraph::load(&config.data_path())?;
            let summary = SpaceliftClient::from_config(&config.spacelift)?.set_sensitive_env_vars(&graph)?;
            println!(
                "Sensitive environment variables: {} set, {} without value, {} failed",
                summary.pushed, summary.skipped, summary.failed
            );
        }

        Commands::SetTfVarsWithInvalidName => {
            let graph = EntityGraph::load(&config.data_path())?;
            let summary = SpaceliftClient::from_config(&config.spacelift)?.set_tf_vars_with_invalid_name(&graph)?;
            println!(
                "Terraform variable files: {} mounted, {} variables without value, {} failed",
                summary.pushed, summary.skipped, summary.failed
            );
        }

        Commands::CreateModuleVersions => {
            let graph = EntityGraph::load(&config.data_path())?;
            let github = GithubClient::from_config(&config.github)?;
            let spacelift = SpaceliftClient::from_config(&config.spacelift)?;
            let summary = maintenance::create_module_versions(&graph, &github, &spacelift)?;
            println!(
                "Module versions: {} created, {} skipped, {} failed",
                summary.pushed, summary.skipped, summary.failed
            );
        }

        Commands::UpdateVcsConfig { path } => {
            let updated = maintenance::update_vcs_config(&config.data_path(), &path)?;
            println!("Updated VCS configuration of {updated} stacks");
        }

        Commands::Config { command } => match command {
            ConfigCommands::Show { json } => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                } else {
                    println!("{}", toml::to_string_pretty(&config)?);
                }
            }
            ConfigCommands::Init { output } => {
                SpacemkConfig::default().save(&output)?;
                println!("Created config file: {output}");
            }
        },
    }

    Ok(())
}
