//! Spacelift GraphQL client and bulk configuration pushes

use crate::config::SpaceliftConfig;
use crate::error::{MigrationError, Result};
use crate::graph::schema::target;
use crate::graph::{Entity, EntityGraph};
use crate::http::{truncate, HttpRequest, Method, ReqwestTransport, Transport};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const API_KEY_USER: &str = r#"
mutation GetSpaceliftToken($apiKeyId: ID!, $apiKeySecret: String!) {
  apiKeyUser(id: $apiKeyId, secret: $apiKeySecret) {
    jwt
  }
}"#;

const STACK_CONFIG_ADD: &str = r#"
mutation UpdateStackConfig($stackId: ID!, $input: ConfigInput!) {
  stackConfigAdd(stack: $stackId, config: $input) {
    id
  }
}"#;

const MODULE_VERSIONS: &str = r#"
query ModuleVersions($id: ID!) {
  module(id: $id) {
    versions(includeFailed: true) {
      number
    }
  }
}"#;

const VERSION_CREATE: &str = r#"
mutation CreateModuleVersion($module: ID!, $commitSha: String, $version: String) {
  versionCreate(module: $module, commitSha: $commitSha, version: $version) {
    id
    number
  }
}"#;

/// File mounted next to a stack's project root to carry Terraform
/// variables whose names cannot be environment variables
pub const INVALID_NAME_VARS_FILE: &str = "spacemk.auto.tfvars.json";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphqlError {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

impl GraphqlResponse {
    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(|e| e.message.as_str())
    }

    /// Value at a JSON pointer below `data`
    pub fn data_at(&self, pointer: &str) -> Option<&Value> {
        self.data.as_ref()?.pointer(pointer)
    }
}

/// Outcome counts of a bulk push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub pushed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SpaceliftClient {
    endpoint: String,
    api_key_id: String,
    api_key_secret: String,
    transport: Arc<dyn Transport>,
    jwt: OnceCell<String>,
}

impl SpaceliftClient {
    pub fn new(endpoint: &str, api_key_id: &str, api_key_secret: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key_id: api_key_id.to_string(),
            api_key_secret: api_key_secret.to_string(),
            transport,
            jwt: OnceCell::new(),
        }
    }

    pub fn from_config(config: &SpaceliftConfig) -> Result<Self> {
        let (endpoint, id, secret) = config.credentials()?;
        let transport = ReqwestTransport::new(Duration::from_secs(60))?;
        Ok(Self::new(endpoint, id, secret, Arc::new(transport)))
    }

    fn post(&self, body: &Value, jwt: Option<&str>) -> Result<GraphqlResponse> {
        let mut request = HttpRequest::new(Method::Post, self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .body(body.to_string());
        if let Some(jwt) = jwt {
            request = request.bearer(jwt);
        }

        let response = self
            .transport
            .send(&request)
            .map_err(|e| e.into_error(&self.endpoint))?;
        if !response.is_success() {
            return Err(MigrationError::Http {
                path: self.endpoint.clone(),
                status: response.status,
                message: truncate(&response.body, 500),
            });
        }
        serde_json::from_str(&response.body).map_err(|e| MigrationError::UnexpectedResponse {
            path: self.endpoint.clone(),
            message: e.to_string(),
        })
    }

    /// Exchange the API key for a JWT, once per client
    fn jwt(&self) -> Result<&str> {
        if let Some(jwt) = self.jwt.get() {
            return Ok(jwt.as_str());
        }
        let response = self.post(
            &json!({
                "query": API_KEY_USER,
                "variables": {"apiKeyId": self.api_key_id, "apiKeySecret": self.api_key_secret},
            }),
            None,
        )?;
        let jwt = response
            .data_at("/apiKeyUser/jwt")
            .and_then(Value::as_str)
            .ok_or_else(|| MigrationError::UnexpectedResponse {
                path: self.endpoint.clone(),
                message: response
                    .first_error()
                    .unwrap_or("no JWT in apiKeyUser response")
                    .to_string(),
            })?;
        debug!("Obtained Spacelift API token");
        Ok(self.jwt.get_or_init(|| jwt.to_string()).as_str())
    }

    /// Run a GraphQL operation; errors in the response are logged and returned
    pub fn call(&self, query: &str, variables: Value) -> Result<GraphqlResponse> {
        let jwt = self.jwt()?;
        let response = self.post(&json!({"query": query, "variables": variables}), Some(jwt))?;
        for error in &response.errors {
            warn!(message = %error.message, "Spacelift API returned an error");
        }
        Ok(response)
    }

    /// Push every write-only stack environment variable that has a value
    pub fn set_sensitive_env_vars(&self, graph: &EntityGraph) -> Result<PushSummary> {
        info!("Start setting sensitive environment variables");
        let mut summary = PushSummary::default();

        for variable in graph.collection(target::STACK_VARIABLES) {
            if !variable.bool_field("write_only") {
                continue;
            }
            let name = variable.name().unwrap_or_default();
            let stack = stack_slug(variable);
            if name.contains('-') {
                warn!("Sensitive environment variable '{stack}/{name}' has a dash in its name");
            }
            let Some(value) = variable.str_field("value").filter(|v| !v.is_empty()) else {
                debug!("No value for '{stack}/{name}' sensitive environment variable. Skipping.");
                summary.skipped += 1;
                continue;
            };

            let response = self.call(
                STACK_CONFIG_ADD,
                json!({
                    "stackId": stack,
                    "input": {"id": name, "type": "ENVIRONMENT_VARIABLE", "value": value, "writeOnly": true},
                }),
            )?;
            match response.first_error() {
                Some(message) => {
                    warn!("Error setting sensitive environment variable '{stack}/{name}': {message}");
                    summary.failed += 1;
                }
                None => summary.pushed += 1,
            }
        }

        info!(?summary, "Stop setting sensitive environment variables");
        Ok(summary)
    }

    /// Mount a `.auto.tfvars.json` file on each stack owning Terraform
    /// variables whose names are not valid environment variable names
    pub fn set_tf_vars_with_invalid_name(&self, graph: &EntityGraph) -> Result<PushSummary> {
        info!("Start setting Terraform variables with invalid names");
        let mut summary = PushSummary::default();

        for (stack, (project_root, variables)) in group_invalid_terraform_vars(graph) {
            let write_only = variables.iter().any(|v| v.bool_field("write_only"));
            let mut values = Map::new();
            for variable in &variables {
                let name = variable.name().unwrap_or_default();
                match variable.field("value") {
                    Some(value) if !value.is_null() => {
                        values.insert(name.to_string(), tfvars_value(variable, value));
                    }
                    _ => {
                        debug!("No value for '{stack}/{name}' Terraform variable. Skipping.");
                        summary.skipped += 1;
                    }
                }
            }
            if values.is_empty() {
                continue;
            }

            let content = serde_json::to_string_pretty(&Value::Object(values))?;
            let response = self.call(
                STACK_CONFIG_ADD,
                json!({
                    "stackId": stack,
                    "input": {
                        "id": mount_path(project_root.as_deref()),
                        "type": "FILE_MOUNT",
                        "value": BASE64.encode(content),
                        "writeOnly": write_only,
                    },
                }),
            )?;
            match response.first_error() {
                Some(message) => {
                    warn!("Error setting Terraform variables file on stack '{stack}': {message}");
                    summary.failed += 1;
                }
                None => summary.pushed += 1,
            }
        }

        info!(?summary, "Stop setting Terraform variables with invalid names");
        Ok(summary)
    }

    /// Version numbers already registered for a module
    pub fn module_versions(&self, module_id: &str) -> Result<BTreeSet<String>> {
        let response = self.call(MODULE_VERSIONS, json!({"id": module_id}))?;
        Ok(response
            .data_at("/module/versions")
            .and_then(Value::as_array)
            .map(|versions| {
                versions
                    .iter()
                    .filter_map(|v| v.get("number").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Create each `version -> commit` not yet registered on the module
    pub fn create_module_versions(&self, module_id: &str, tags: &BTreeMap<String, String>) -> Result<PushSummary> {
        let existing = self.module_versions(module_id)?;
        let mut summary = PushSummary::default();
        for (version, commit_sha) in tags {
            if existing.contains(version) {
                debug!(module = module_id, version, "Module version already exists");
                summary.skipped += 1;
                continue;
            }
            let response = self.call(
                VERSION_CREATE,
                json!({"module": module_id, "commitSha": commit_sha, "version": version}),
            )?;
            match response.first_error() {
                Some(message) => {
                    warn!(module = module_id, version, "Cannot create module version: {message}");
                    summary.failed += 1;
                }
                None => {
                    info!(module = module_id, version, "Created module version");
                    summary.pushed += 1;
                }
            }
        }
        Ok(summary)
    }
}

/// Spacelift id of a module: `terraform-<provider>-<name>`
pub fn module_id(module: &Entity) -> Option<String> {
    let name = module.name()?;
    let provider = module.str_field("terraform_provider")?;
    Some(crate::mapping::normalize::slugify(&format!("terraform-{provider}-{name}")))
}

fn stack_slug(variable: &Entity) -> &str {
    variable
        .related("stack")
        .and_then(|stack| stack.fields.get("slug"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

type InvalidVarsByStack<'a> = BTreeMap<String, (Option<String>, Vec<&'a Entity>)>;

fn group_invalid_terraform_vars(graph: &EntityGraph) -> InvalidVarsByStack<'_> {
    let mut grouped: InvalidVarsByStack<'_> = BTreeMap::new();
    for variable in graph.collection(target::STACK_VARIABLES) {
        if variable.str_field("type") != Some("terraform") || variable.bool_field("valid_name") {
            continue;
        }
        let project_root = variable
            .related("stack")
            .and_then(|stack| stack.fields.get("vcs"))
            .and_then(|vcs| vcs.get("project_root"))
            .and_then(Value::as_str)
            .map(str::to_string);
        grouped
            .entry(stack_slug(variable).to_string())
            .or_insert_with(|| (project_root, Vec::new()))
            .1
            .push(variable);
    }
    grouped
}

/// HCL values that are valid JSON are mounted as such; everything else as a string
fn tfvars_value(variable: &Entity, value: &Value) -> Value {
    match value {
        Value::String(text) if variable.bool_field("hcl") => {
            serde_json::from_str(text).unwrap_or_else(|_| {
                warn!(
                    variable = variable.name().unwrap_or_default(),
                    "HCL value is not valid JSON, mounting it as a string"
                );
                value.clone()
            })
        }
        other => other.clone(),
    }
}

fn mount_path(project_root: Option<&str>) -> String {
    let root = crate::codegen::templates::normalize_path(project_root.unwrap_or_default());
    let root = root.trim_start_matches('/');
    if root.is_empty() {
        format!("source/{INVALID_NAME_VARS_FILE}")
    } else {
        format!("source/{root}/{INVALID_NAME_VARS_FILE}")
    }
}
