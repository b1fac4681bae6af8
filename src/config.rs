//! Configuration management for spacemk
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (spacemk.toml)
//! - Environment variables (SPACEMK__*)
//!
//! ## Example config file (spacemk.toml):
//! ```toml
//! log_level = "info"
//! work_dir = "tmp"
//!
//! [exporter]
//! name = "terraform"
//! api_endpoint = "https://app.terraform.io"
//! api_token = "..."
//!
//! [exporter.include]
//! workspaces = "^prod-"
//!
//! [filter]
//! stacks = "^prod-"
//!
//! [generator]
//! output_dir = "tmp/code"
//!
//! [spacelift]
//! api_key_endpoint = "https://example.app.spacelift.io/graphql"
//! api_key_id = "..."
//! api_key_secret = "..."
//! ```

use crate::error::{MigrationError, Result};
use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration, threaded through every pipeline component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacemkConfig {
    /// Default log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory holding data.json, audit.json, report.xlsx and downloaded state files
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Source platform settings
    #[serde(default)]
    pub exporter: ExporterConfig,

    /// Normalized graph filter patterns
    #[serde(default)]
    pub filter: FilterConfig,

    /// Code generation settings
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Target platform API settings
    #[serde(default)]
    pub spacelift: SpaceliftConfig,

    /// GitHub API settings (module version sync)
    #[serde(default)]
    pub github: GithubConfig,
}

/// Source platform (Terraform Cloud/Enterprise) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Registered exporter name
    #[serde(default = "default_engine_name")]
    pub name: String,

    /// API base URL, without the /api/v2 suffix
    #[serde(default = "default_tfc_endpoint")]
    pub api_endpoint: String,

    /// Bearer token
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Agent image used for the ephemeral worker
    #[serde(default = "default_agent_image")]
    pub agent_image: String,

    /// Recover write-only variable values through plan logs
    #[serde(default = "default_true")]
    pub enrich_sensitive_values: bool,

    /// Download current state files during export
    #[serde(default)]
    pub download_state_files: bool,

    /// Delay between plan status polls
    #[serde(default = "default_poll_interval")]
    pub plan_poll_interval_secs: u64,

    /// Upper bound on waiting for a plan to finish
    #[serde(default = "default_plan_timeout")]
    pub plan_timeout_secs: u64,

    /// Name patterns applied during extraction, keyed by source collection
    #[serde(default)]
    pub include: BTreeMap<String, String>,
}

/// Filter patterns keyed by target collection (stacks, modules, ...)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilterConfig {
    #[serde(flatten)]
    pub patterns: BTreeMap<String, String>,
}

/// Code generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Registered generator name
    #[serde(default = "default_engine_name")]
    pub name: String,

    /// Directory searched for templates before the bundled ones
    #[serde(default)]
    pub template_dir: Option<PathBuf>,

    /// Where rendered files are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Formatter/validator binary
    #[serde(default = "default_tool")]
    pub tool: String,

    #[serde(default = "default_true")]
    pub format: bool,

    #[serde(default = "default_true")]
    pub validate: bool,

    /// Extra values exposed to templates as `extra_vars`
    #[serde(default)]
    pub extra_vars: BTreeMap<String, String>,
}

/// Target platform (Spacelift) configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpaceliftConfig {
    /// GraphQL endpoint, e.g. https://example.app.spacelift.io/graphql
    #[serde(default)]
    pub api_key_endpoint: Option<String>,

    #[serde(default)]
    pub api_key_id: Option<String>,

    #[serde(default)]
    pub api_key_secret: Option<String>,
}

/// GitHub API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_github_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_token: Option<String>,
}

// Default value functions
fn default_log_level() -> String {
    "warn".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_engine_name() -> String {
    "terraform".to_string()
}

fn default_tfc_endpoint() -> String {
    "https://app.terraform.io".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_agent_image() -> String {
    "jmfontaine/tfc-agent:smk-latest".to_string()
}

fn default_poll_interval() -> u64 {
    3
}

fn default_plan_timeout() -> u64 {
    900
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("tmp/code")
}

fn default_tool() -> String {
    "terraform".to_string()
}

fn default_github_endpoint() -> String {
    "https://api.github.com".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
            api_endpoint: default_tfc_endpoint(),
            api_token: None,
            request_timeout_secs: default_request_timeout(),
            agent_image: default_agent_image(),
            enrich_sensitive_values: true,
            download_state_files: false,
            plan_poll_interval_secs: default_poll_interval(),
            plan_timeout_secs: default_plan_timeout(),
            include: BTreeMap::new(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
            template_dir: None,
            output_dir: default_output_dir(),
            tool: default_tool(),
            format: true,
            validate: true,
            extra_vars: BTreeMap::new(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_github_endpoint(),
            api_token: None,
        }
    }
}

impl Default for SpacemkConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            work_dir: default_work_dir(),
            exporter: ExporterConfig::default(),
            filter: FilterConfig::default(),
            generator: GeneratorConfig::default(),
            spacelift: SpaceliftConfig::default(),
            github: GithubConfig::default(),
        }
    }
}

impl SpacemkConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["spacemk.toml", ".spacemk.toml", "config/spacemk.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("io", "spacelift", "spacemk") {
            let xdg_config = config_dir.config_dir().join("spacemk.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (SPACEMK__*)
        builder = builder.add_source(
            Environment::with_prefix("SPACEMK")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Path of the persisted graph snapshot
    pub fn data_path(&self) -> PathBuf {
        self.work_dir.join("data.json")
    }

    /// Path of the persisted audit report
    pub fn audit_path(&self) -> PathBuf {
        self.work_dir.join("audit.json")
    }

    /// Path of the audit workbook
    pub fn report_path(&self) -> PathBuf {
        self.work_dir.join("report.xlsx")
    }

    /// Directory receiving downloaded state files
    pub fn state_files_dir(&self) -> PathBuf {
        self.work_dir.join("state-files")
    }
}

impl ExporterConfig {
    /// Source API token, required by every exporter operation
    pub fn token(&self) -> Result<&str> {
        self.api_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| MigrationError::Config("exporter.api_token is not set".to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Include pattern for a source collection, if any
    pub fn include_pattern(&self, collection: &str) -> Option<&str> {
        self.include.get(collection).map(String::as_str)
    }
}

impl SpaceliftConfig {
    /// Endpoint and API key credentials, all required for the target API
    pub fn credentials(&self) -> Result<(&str, &str, &str)> {
        fn field<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| MigrationError::Config(format!("spacelift.{name} is not set")))
        }
        Ok((
            field(&self.api_key_endpoint, "api_key_endpoint")?,
            field(&self.api_key_id, "api_key_id")?,
            field(&self.api_key_secret, "api_key_secret")?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SpacemkConfig::default();
        assert_eq!(config.exporter.name, "terraform");
        assert_eq!(config.exporter.api_endpoint, "https://app.terraform.io");
        assert_eq!(config.exporter.plan_poll_interval_secs, 3);
        assert_eq!(config.data_path(), PathBuf::from("tmp/data.json"));
    }

    #[test]
    fn test_serialize_config() {
        let config = SpacemkConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[exporter]"));
        assert!(toml_str.contains("[generator]"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[exporter]
api_token = "secret"

[exporter.include]
workspaces = "^prod-"

[filter]
stacks = "^prod-"
"#,
        )
        .unwrap();

        let config = SpacemkConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.exporter.token().unwrap(), "secret");
        assert_eq!(config.exporter.include_pattern("workspaces"), Some("^prod-"));
        assert_eq!(config.filter.patterns.get("stacks").map(String::as_str), Some("^prod-"));
    }

    #[test]
    fn test_missing_credentials_are_config_errors() {
        let config = SpacemkConfig::default();
        assert!(matches!(config.exporter.token(), Err(MigrationError::Config(_))));
        assert!(matches!(config.spacelift.credentials(), Err(MigrationError::Config(_))));
    }

    #[test]
    fn test_spacelift_credentials() {
        let mut config = SpaceliftConfig {
            api_key_endpoint: Some("https://acme.app.spacelift.io/graphql".to_string()),
            api_key_id: Some("key-id".to_string()),
            api_key_secret: Some(String::new()),
        };
        assert!(matches!(
            config.credentials(),
            Err(MigrationError::Config(message)) if message.contains("api_key_secret")
        ));

        config.api_key_secret = Some("key-secret".to_string());
        assert_eq!(
            config.credentials().unwrap(),
            ("https://acme.app.spacelift.io/graphql", "key-id", "key-secret")
        );
    }
}
