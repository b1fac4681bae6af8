//! Secret enrichment through plan logs
//!
//! The source API never returns write-only variable values. For every
//! organization owning sensitive workspace variables we create a temporary
//! agent pool, start one ephemeral worker on it, and run a plan-only run per
//! workspace on that pool. The agent image prints the run environment, so the
//! values can be read back from the plan log.
//!
//! Enrichment failures only leave values unset. The worker and the agent pool
//! are always released, including on early return or panic.

use super::client::{FetchRequest, TfcClient};
use super::worker::{Worker, WorkerLauncher};
use crate::error::{MigrationError, Result};
use crate::graph::schema::source;
use crate::graph::RawGraph;
use crate::http::Method;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Plan log line carrying the VCS branch of the configuration version
pub const BRANCH_KEY: &str = "ATLAS_CONFIGURATION_VERSION_GITHUB_BRANCH";

const AGENT_POOL_NAME: &str = "SMK";

/// Plan status polling bounds
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(900),
        }
    }
}

/// A workspace whose sensitive values should be recovered
#[derive(Debug, Clone)]
pub struct WorkspaceTarget<'a> {
    pub organization_id: &'a str,
    pub workspace_id: &'a str,
    /// Variable names to look for
    pub keys: Vec<&'a str>,
}

/// Recovers write-only values for one workspace
pub trait SensitiveValueSource {
    fn retrieve_sensitive_values(&self, workspace: &WorkspaceTarget<'_>) -> Result<BTreeMap<String, String>>;
}

/// Scan a plan log for `<key>=<value>` lines
pub fn scrape_plan_log(log: &str, keys: &[&str]) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in log.lines() {
        let line = line.trim_end_matches('\r');
        for key in keys {
            if let Some(value) = line.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')) {
                debug!("Found sensitive env var: '{key}={}'", "*".repeat(value.chars().count()));
                values.insert(key.to_string(), value.to_string());
            }
        }
    }
    values
}

// ============================================================================
// Source platform calls
// ============================================================================

fn create_agent_pool(client: &TfcClient, organization_id: &str) -> Result<String> {
    let body = json!({
        "data": {
            "attributes": {"name": AGENT_POOL_NAME, "organization-scoped": true},
            "type": "agent-pools"
        }
    });
    let pool = client
        .fetch_one(&FetchRequest::post(
            format!("/organizations/{organization_id}/agent-pools"),
            body,
            &["id"],
        ))?
        .and_then(|r| r.id().map(str::to_string))
        .ok_or_else(|| MigrationError::Enrichment(format!("no agent pool returned for '{organization_id}'")))?;
    info!(agent_pool = %pool, "Created agent pool");
    Ok(pool)
}

fn create_agent_token(client: &TfcClient, agent_pool_id: &str) -> Result<String> {
    let body = json!({
        "data": {
            "attributes": {"description": AGENT_POOL_NAME},
            "type": "authentication-tokens"
        }
    });
    let token = client
        .fetch_one(&FetchRequest::post(
            format!("/agent-pools/{agent_pool_id}/authentication-tokens"),
            body,
            &["attributes.token", "id"],
        ))?
        .ok_or_else(|| MigrationError::Enrichment(format!("no token returned for '{agent_pool_id}'")))?;
    info!(token_id = token.id().unwrap_or_default(), "Created agent token");
    token
        .get_str("attributes.token")
        .map(str::to_string)
        .ok_or_else(|| MigrationError::Enrichment(format!("empty token for '{agent_pool_id}'")))
}

fn delete_agent_pool(client: &TfcClient, agent_pool_id: &str) -> Result<()> {
    info!(agent_pool = agent_pool_id, "Deleting agent pool");
    client
        .call(Method::Delete, &format!("/agent-pools/{agent_pool_id}"), None)
        .map(|_| ())
}

// ============================================================================
// Agent session guard
// ============================================================================

/// Temporary agent pool plus the worker bound to it
///
/// Dropping the session stops the worker and deletes the pool.
pub struct AgentSession<'a> {
    client: &'a TfcClient,
    organization_id: String,
    agent_pool_id: String,
    worker: Option<Box<dyn Worker>>,
    released: bool,
}

impl<'a> AgentSession<'a> {
    pub fn open(client: &'a TfcClient, launcher: &dyn WorkerLauncher, organization_id: &str) -> Result<Self> {
        info!(organization = organization_id, "Start local agent");
        let agent_pool_id = create_agent_pool(client, organization_id)?;
        let mut session = Self {
            client,
            organization_id: organization_id.to_string(),
            agent_pool_id,
            worker: None,
            released: false,
        };

        let token = create_agent_token(client, &session.agent_pool_id)?;
        let worker = launcher.launch(&format!("smk-tfc-agent-{organization_id}"), &token)?;
        session.worker = Some(worker);
        Ok(session)
    }

    pub fn agent_pool_id(&self) -> &str {
        &self.agent_pool_id
    }

    /// Release the worker and the pool now
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        info!(organization = %self.organization_id, "Stop local agent");

        if let Some(mut worker) = self.worker.take() {
            if worker.is_running() {
                match worker.logs() {
                    Ok(logs) => debug!(container = worker.id(), "Agent logs:\n{logs}"),
                    Err(e) => debug!(container = worker.id(), error = %e, "Cannot read agent logs"),
                }
            } else {
                warn!(container = worker.id(), "Agent was already stopped when pulling its logs");
            }
            if let Err(e) = worker.stop() {
                warn!(container = worker.id(), error = %e, "Cannot stop agent");
            }
        }

        if let Err(e) = delete_agent_pool(self.client, &self.agent_pool_id) {
            warn!(agent_pool = %self.agent_pool_id, error = %e, "Cannot delete agent pool, delete it manually");
        }
    }
}

impl Drop for AgentSession<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Plan log retriever
// ============================================================================

/// Recovers values by running a plan on the session's agent pool
pub struct PlanLogRetriever<'a> {
    client: &'a TfcClient,
    agent_pool_id: &'a str,
    poll: PollSettings,
}

struct ExecutionSettings {
    execution_mode: Value,
    setting_overwrites: Value,
    agent_pool: Value,
}

impl<'a> PlanLogRetriever<'a> {
    pub fn new(client: &'a TfcClient, agent_pool_id: &'a str, poll: PollSettings) -> Self {
        Self {
            client,
            agent_pool_id,
            poll,
        }
    }

    fn snapshot_settings(&self, workspace_id: &str) -> Result<ExecutionSettings> {
        let workspace = self
            .client
            .fetch_one(&FetchRequest::get(
                format!("/workspaces/{workspace_id}"),
                &[
                    "attributes.execution-mode",
                    "attributes.setting-overwrites",
                    "relationships.agent-pool",
                ],
            ))?
            .ok_or_else(|| MigrationError::Enrichment(format!("workspace '{workspace_id}' not found")))?;
        Ok(ExecutionSettings {
            execution_mode: workspace.get("attributes.execution-mode").cloned().unwrap_or(Value::Null),
            setting_overwrites: workspace
                .get("attributes.setting-overwrites")
                .cloned()
                .unwrap_or(Value::Null),
            agent_pool: workspace
                .get("relationships.agent-pool")
                .cloned()
                .unwrap_or_else(|| json!({"data": null})),
        })
    }

    fn switch_to_pool(&self, workspace_id: &str) -> Result<()> {
        let body = json!({
            "data": {
                "attributes": {
                    "agent-pool-id": self.agent_pool_id,
                    "execution-mode": "agent",
                    "setting-overwrites": {"execution-mode": true, "agent-pool": true}
                },
                "type": "workspaces"
            }
        });
        self.client
            .call(Method::Patch, &format!("/workspaces/{workspace_id}"), Some(&body))
            .map(|_| ())
    }

    fn restore(&self, workspace_id: &str, settings: &ExecutionSettings) -> Result<()> {
        let body = json!({
            "data": {
                "attributes": {
                    "execution-mode": settings.execution_mode,
                    "setting-overwrites": settings.setting_overwrites
                },
                "relationships": {"agent-pool": settings.agent_pool},
                "type": "workspaces"
            }
        });
        self.client
            .call(Method::Patch, &format!("/workspaces/{workspace_id}"), Some(&body))
            .map(|_| ())
    }

    fn trigger_plan(&self, workspace_id: &str) -> Result<String> {
        let body = json!({
            "data": {
                "attributes": {"allow-empty-apply": false, "plan-only": true, "refresh": false},
                "relationships": {"workspace": {"data": {"id": workspace_id, "type": "workspaces"}}},
                "type": "runs"
            }
        });
        self.client
            .fetch_one(&FetchRequest::post("/runs", body, &["relationships.plan.data.id"]))?
            .and_then(|run| run.related_id("plan").map(str::to_string))
            .ok_or_else(|| MigrationError::Enrichment(format!("no plan created for '{workspace_id}'")))
    }

    /// Poll until terminal; `None` for plans that ended without output
    fn wait_for_plan(&self, plan_id: &str) -> Result<Option<String>> {
        let started = Instant::now();
        loop {
            let plan = self
                .client
                .fetch_one(&FetchRequest::get(
                    format!("/plans/{plan_id}"),
                    &["attributes.log-read-url", "attributes.status"],
                ))?
                .ok_or_else(|| MigrationError::Enrichment(format!("plan '{plan_id}' not found")))?;

            match plan.get_str("attributes.status") {
                Some("errored") | Some("finished") => {
                    return Ok(plan.get_str("attributes.log-read-url").map(str::to_string));
                }
                Some(status @ ("canceled" | "unreachable")) => {
                    warn!(plan = plan_id, status, "Plan ended without output, ignoring");
                    return Ok(None);
                }
                _ => {}
            }

            if started.elapsed() >= self.poll.timeout {
                return Err(MigrationError::PlanTimeout {
                    plan_id: plan_id.to_string(),
                    seconds: self.poll.timeout.as_secs(),
                });
            }
            debug!(plan = plan_id, "Plan is not finished yet, waiting");
            thread::sleep(self.poll.interval);
        }
    }

    fn run_and_scrape(&self, workspace: &WorkspaceTarget<'_>) -> Result<BTreeMap<String, String>> {
        info!(workspace = workspace.workspace_id, "Trigger a plan");
        let plan_id = self.trigger_plan(workspace.workspace_id)?;
        let Some(log_url) = self.wait_for_plan(&plan_id)? else {
            return Ok(BTreeMap::new());
        };
        let log = self.client.download_text(&log_url)?;
        Ok(scrape_plan_log(&log, &workspace.keys))
    }
}

impl SensitiveValueSource for PlanLogRetriever<'_> {
    fn retrieve_sensitive_values(&self, workspace: &WorkspaceTarget<'_>) -> Result<BTreeMap<String, String>> {
        let id = workspace.workspace_id;
        info!(organization = workspace.organization_id, workspace = id, "Backing up workspace execution mode");
        let settings = self.snapshot_settings(id)?;

        info!(workspace = id, "Switching workspace to the local agent");
        let result = self
            .switch_to_pool(id)
            .and_then(|_| self.run_and_scrape(workspace));

        info!(workspace = id, "Restoring workspace execution mode");
        let restored = self.restore(id, &settings);

        let values = result?;
        restored?;
        Ok(values)
    }
}

// ============================================================================
// Orchestration
// ============================================================================

/// organization id -> workspace id -> variable id -> key
type SensitiveIndex = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

/// Groups sensitive workspace variables by organization and workspace
pub fn group_sensitive_variables(graph: &RawGraph) -> SensitiveIndex {
    let mut index = SensitiveIndex::new();
    for variable in graph.collection(source::WORKSPACE_VARIABLES) {
        if !variable.get_bool("attributes.sensitive") {
            continue;
        }
        let (Some(variable_id), Some(key), Some(workspace_id)) = (
            variable.id(),
            variable.get_str("attributes.key"),
            variable.related_id("workspace"),
        ) else {
            continue;
        };
        let Some(organization_id) = graph
            .find(source::WORKSPACES, workspace_id)
            .and_then(|w| w.related_id("organization"))
        else {
            warn!(workspace = workspace_id, "Could not find workspace");
            continue;
        };
        index
            .entry(organization_id.to_string())
            .or_default()
            .entry(workspace_id.to_string())
            .or_default()
            .insert(variable_id.to_string(), key.to_string());
    }
    index
}

/// Recovers sensitive workspace variable values in place
pub struct SecretEnricher<'a> {
    client: &'a TfcClient,
    launcher: &'a dyn WorkerLauncher,
    poll: PollSettings,
}

impl<'a> SecretEnricher<'a> {
    pub fn new(client: &'a TfcClient, launcher: &'a dyn WorkerLauncher, poll: PollSettings) -> Self {
        Self {
            client,
            launcher,
            poll,
        }
    }

    /// Returns the number of recovered values
    pub fn enrich(&self, graph: &mut RawGraph) -> usize {
        let index = group_sensitive_variables(graph);
        if index.is_empty() {
            return 0;
        }
        if !self.launcher.is_available() {
            warn!("Docker is not available. Skipping enriching workspace variables data.");
            return 0;
        }

        info!("Start enriching workspace variables data");
        let mut recovered = 0;
        for (organization_id, workspaces) in &index {
            match self.enrich_organization(organization_id, workspaces, graph) {
                Ok(count) => recovered += count,
                Err(e) => warn!(organization = %organization_id, error = %e, "Cannot enrich organization"),
            }
        }
        info!(recovered, "Stop enriching workspace variables data");
        recovered
    }

    fn enrich_organization(
        &self,
        organization_id: &str,
        workspaces: &BTreeMap<String, BTreeMap<String, String>>,
        graph: &mut RawGraph,
    ) -> Result<usize> {
        let session = AgentSession::open(self.client, self.launcher, organization_id)?;
        let retriever = PlanLogRetriever::new(self.client, session.agent_pool_id(), self.poll);

        let mut recovered = 0;
        for (workspace_id, variables) in workspaces {
            let has_configuration = graph
                .find(source::WORKSPACES, workspace_id)
                .is_some_and(|w| w.has("relationships.current-configuration-version.data.id"));
            if !has_configuration {
                warn!(organization = organization_id, workspace = %workspace_id, "Workspace has no current configuration, ignoring");
                continue;
            }

            let mut keys: Vec<&str> = variables.values().map(String::as_str).collect();
            keys.push(BRANCH_KEY);
            let target = WorkspaceTarget {
                organization_id,
                workspace_id,
                keys,
            };

            match retriever.retrieve_sensitive_values(&target) {
                Ok(values) => recovered += apply_values(graph, workspace_id, variables, values),
                Err(e) => warn!(workspace = %workspace_id, error = %e, "Cannot retrieve sensitive values"),
            }
        }

        drop(retriever);
        session.close();
        Ok(recovered)
    }
}

fn apply_values(
    graph: &mut RawGraph,
    workspace_id: &str,
    variables: &BTreeMap<String, String>,
    mut values: BTreeMap<String, String>,
) -> usize {
    if let Some(branch) = values.remove(BRANCH_KEY) {
        if let Some(workspace) = graph
            .collection_mut(source::WORKSPACES)
            .iter_mut()
            .find(|w| w.id() == Some(workspace_id))
        {
            if workspace.get_str("attributes.vcs-repo.branch").map_or(true, str::is_empty) {
                workspace.set("attributes.vcs-repo.branch", Value::String(branch));
            }
        }
    }

    let mut applied = 0;
    for variable in graph.collection_mut(source::WORKSPACE_VARIABLES).iter_mut() {
        let Some(key) = variable.id().and_then(|id| variables.get(id)) else {
            continue;
        };
        if let Some(value) = values.get(key) {
            variable.set("attributes.value", Value::String(value.clone()));
            applied += 1;
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, ScriptedTransport};
    use crate::record::Record;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Events(Arc<Mutex<Vec<String>>>);

    impl Events {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }

        fn all(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FakeWorker {
        events: Events,
    }

    impl Worker for FakeWorker {
        fn id(&self) -> &str {
            "container-1"
        }

        fn is_running(&self) -> bool {
            true
        }

        fn logs(&self) -> Result<String> {
            Ok("agent started".to_string())
        }

        fn stop(&mut self) -> Result<()> {
            self.events.push("stop".to_string());
            Ok(())
        }
    }

    struct FakeLauncher {
        available: bool,
        events: Events,
    }

    impl WorkerLauncher for FakeLauncher {
        fn is_available(&self) -> bool {
            self.available
        }

        fn launch(&self, name: &str, token: &str) -> Result<Box<dyn Worker>> {
            self.events.push(format!("launch {name} {token}"));
            Ok(Box::new(FakeWorker {
                events: self.events.clone(),
            }))
        }
    }

    fn fast_poll() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(0),
            timeout: Duration::from_secs(5),
        }
    }

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn workspace(id: &str, configured: bool) -> Record {
        let mut workspace = record(json!({
            "id": id,
            "attributes": {"name": id, "vcs-repo": {"branch": ""}},
            "relationships": {"organization": {"data": {"id": "acme"}}}
        }));
        if configured {
            workspace.set("relationships.current-configuration-version.data.id", json!(format!("cv-{id}")));
        }
        workspace
    }

    fn variable(id: &str, workspace_id: &str, key: &str, sensitive: bool) -> Record {
        let value = if sensitive { Value::Null } else { json!("plain") };
        record(json!({
            "id": id,
            "attributes": {"key": key, "sensitive": sensitive, "value": value},
            "relationships": {"workspace": {"data": {"id": workspace_id}}}
        }))
    }

    fn agent_routes(transport: ScriptedTransport) -> ScriptedTransport {
        transport
            .json(Method::Post, "/organizations/acme/agent-pools", json!({"data": {"id": "apool-1"}}))
            .json(
                Method::Post,
                "/agent-pools/apool-1/authentication-tokens",
                json!({"data": {"id": "at-1", "attributes": {"token": "agent-token"}}}),
            )
            .on(Method::Delete, "/agent-pools/apool-1", Ok(HttpResponse::new(204, "")))
    }

    fn workspace_routes(transport: ScriptedTransport, id: &str, plan: &str) -> ScriptedTransport {
        transport
            .json(
                Method::Get,
                &format!("/workspaces/{id}"),
                json!({"data": {"id": id, "attributes": {"execution-mode": "remote", "setting-overwrites": {"execution-mode": false}}, "relationships": {"agent-pool": {"data": null}}}}),
            )
            .json(Method::Patch, &format!("/workspaces/{id}"), json!({"data": {"id": id}}))
            .json(Method::Get, &format!("/plans/{plan}"), json!({"data": {"id": plan, "attributes": {"status": "running"}}}))
            .json(
                Method::Get,
                &format!("/plans/{plan}"),
                json!({"data": {"id": plan, "attributes": {"status": "finished", "log-read-url": format!("https://archivist.test/{plan}")}}}),
            )
    }

    #[test]
    fn test_scrape_plan_log() {
        let log = "Terraform v1.5.7\r\nDB_PASSWORD=hunter2\nDB_PASSWORD_OLD=nope\nAPI_KEY=a=b\n";
        let values = scrape_plan_log(log, &["DB_PASSWORD", "API_KEY", "MISSING"]);
        assert_eq!(values.get("DB_PASSWORD").map(String::as_str), Some("hunter2"));
        assert_eq!(values.get("API_KEY").map(String::as_str), Some("a=b"));
        assert!(!values.contains_key("MISSING"));
    }

    #[test]
    fn test_grouping_skips_plain_variables() {
        let mut graph = RawGraph::new();
        graph.insert(source::WORKSPACES, vec![workspace("ws-1", true)]);
        graph.insert(
            source::WORKSPACE_VARIABLES,
            vec![
                variable("var-1", "ws-1", "DB_PASSWORD", true),
                variable("var-2", "ws-1", "REGION", false),
            ],
        );
        let index = group_sensitive_variables(&graph);
        assert_eq!(index["acme"]["ws-1"].len(), 1);
        assert_eq!(index["acme"]["ws-1"]["var-1"], "DB_PASSWORD");
    }

    #[test]
    fn test_recovers_values_and_branch() {
        let transport = workspace_routes(agent_routes(ScriptedTransport::new()), "ws-1", "plan-1")
            .json(Method::Post, "/runs", json!({"data": {"id": "run-1", "relationships": {"plan": {"data": {"id": "plan-1"}}}}}))
            .on(
                Method::Get,
                "https://archivist.test/plan-1",
                Ok(HttpResponse::ok("DB_PASSWORD=hunter2\nATLAS_CONFIGURATION_VERSION_GITHUB_BRANCH=main\n")),
            );
        let transport = Arc::new(transport);
        let client = TfcClient::new("https://tfc.test", "token", transport.clone());
        let events = Events::default();
        let launcher = FakeLauncher { available: true, events: events.clone() };

        let mut graph = RawGraph::new();
        graph.insert(source::WORKSPACES, vec![workspace("ws-1", true)]);
        graph.insert(
            source::WORKSPACE_VARIABLES,
            vec![variable("var-1", "ws-1", "DB_PASSWORD", true), variable("var-2", "ws-1", "REGION", false)],
        );

        let recovered = SecretEnricher::new(&client, &launcher, fast_poll()).enrich(&mut graph);

        assert_eq!(recovered, 1);
        let secret = graph.find(source::WORKSPACE_VARIABLES, "var-1").unwrap();
        assert_eq!(secret.get_str("attributes.value"), Some("hunter2"));
        let plain = graph.find(source::WORKSPACE_VARIABLES, "var-2").unwrap();
        assert_eq!(plain.get_str("attributes.value"), Some("plain"));
        let ws = graph.find(source::WORKSPACES, "ws-1").unwrap();
        assert_eq!(ws.get_str("attributes.vcs-repo.branch"), Some("main"));

        // Switch then restore
        assert_eq!(transport.requests_to(Method::Patch, "/workspaces/ws-1").len(), 2);
        assert_eq!(transport.requests_to(Method::Delete, "/agent-pools/apool-1").len(), 1);
        assert_eq!(events.all(), vec!["launch smk-tfc-agent-acme agent-token", "stop"]);
    }

    #[test]
    fn test_mid_loop_failure_still_releases_pool_and_worker() {
        let transport = workspace_routes(agent_routes(ScriptedTransport::new()), "ws-1", "plan-1")
            .json(
                Method::Get,
                "/workspaces/ws-2",
                json!({"data": {"id": "ws-2", "attributes": {"execution-mode": "remote"}}}),
            )
            .on(Method::Patch, "/workspaces/ws-2", Ok(HttpResponse::new(500, "boom")))
            .json(Method::Post, "/runs", json!({"data": {"relationships": {"plan": {"data": {"id": "plan-1"}}}}}))
            .on(Method::Get, "https://archivist.test/plan-1", Ok(HttpResponse::ok("TOKEN_A=a\n")));
        let transport = Arc::new(transport);
        let client = TfcClient::new("https://tfc.test", "token", transport.clone());
        let events = Events::default();
        let launcher = FakeLauncher { available: true, events: events.clone() };

        let mut graph = RawGraph::new();
        graph.insert(source::WORKSPACES, vec![workspace("ws-1", true), workspace("ws-2", true)]);
        graph.insert(
            source::WORKSPACE_VARIABLES,
            vec![variable("var-1", "ws-1", "TOKEN_A", true), variable("var-2", "ws-2", "TOKEN_B", true)],
        );

        let recovered = SecretEnricher::new(&client, &launcher, fast_poll()).enrich(&mut graph);

        assert_eq!(recovered, 1);
        assert!(!graph.find(source::WORKSPACE_VARIABLES, "var-2").unwrap().has("attributes.value"));
        assert_eq!(transport.requests_to(Method::Delete, "/agent-pools/apool-1").len(), 1);
        assert!(events.all().contains(&"stop".to_string()));
    }

    #[test]
    fn test_worker_launch_failure_deletes_pool() {
        struct BrokenLauncher;
        impl WorkerLauncher for BrokenLauncher {
            fn is_available(&self) -> bool {
                true
            }
            fn launch(&self, _: &str, _: &str) -> Result<Box<dyn Worker>> {
                Err(MigrationError::Worker("image not found".to_string()))
            }
        }

        let transport = Arc::new(agent_routes(ScriptedTransport::new()));
        let client = TfcClient::new("https://tfc.test", "token", transport.clone());
        let mut graph = RawGraph::new();
        graph.insert(source::WORKSPACES, vec![workspace("ws-1", true)]);
        graph.insert(source::WORKSPACE_VARIABLES, vec![variable("var-1", "ws-1", "TOKEN", true)]);

        let recovered = SecretEnricher::new(&client, &BrokenLauncher, fast_poll()).enrich(&mut graph);
        assert_eq!(recovered, 0);
        assert_eq!(transport.requests_to(Method::Delete, "/agent-pools/apool-1").len(), 1);
    }

    #[test]
    fn test_session_released_on_drop() {
        let transport = Arc::new(agent_routes(ScriptedTransport::new()));
        let client = TfcClient::new("https://tfc.test", "token", transport.clone());
        let events = Events::default();
        let launcher = FakeLauncher { available: true, events: events.clone() };

        {
            let session = AgentSession::open(&client, &launcher, "acme").unwrap();
            assert_eq!(session.agent_pool_id(), "apool-1");
        }

        assert_eq!(events.all().last().map(String::as_str), Some("stop"));
        assert_eq!(transport.requests_to(Method::Delete, "/agent-pools/apool-1").len(), 1);
    }

    #[test]
    fn test_unavailable_side_channel_leaves_values_unset() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = TfcClient::new("https://tfc.test", "token", transport.clone());
        let launcher = FakeLauncher { available: false, events: Events::default() };
        let mut graph = RawGraph::new();
        graph.insert(source::WORKSPACES, vec![workspace("ws-1", true)]);
        graph.insert(source::WORKSPACE_VARIABLES, vec![variable("var-1", "ws-1", "TOKEN", true)]);

        assert_eq!(SecretEnricher::new(&client, &launcher, fast_poll()).enrich(&mut graph), 0);
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_plan_timeout() {
        let transport = ScriptedTransport::new().json(
            Method::Get,
            "/plans/plan-9",
            json!({"data": {"id": "plan-9", "attributes": {"status": "queued"}}}),
        );
        let client = TfcClient::new("https://tfc.test", "token", Arc::new(transport));
        let poll = PollSettings {
            interval: Duration::from_millis(0),
            timeout: Duration::from_millis(0),
        };
        let retriever = PlanLogRetriever::new(&client, "apool-1", poll);
        assert!(matches!(retriever.wait_for_plan("plan-9"), Err(MigrationError::PlanTimeout { .. })));
    }

    #[test]
    fn test_canceled_plan_has_no_output() {
        let transport = ScriptedTransport::new().json(
            Method::Get,
            "/plans/plan-3",
            json!({"data": {"id": "plan-3", "attributes": {"status": "canceled"}}}),
        );
        let client = TfcClient::new("https://tfc.test", "token", Arc::new(transport));
        let retriever = PlanLogRetriever::new(&client, "apool-1", fast_poll());
        assert_eq!(retriever.wait_for_plan("plan-3").unwrap(), None);
    }
}
