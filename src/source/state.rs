//! Current state file download

use super::client::{FetchRequest, TfcClient};
use crate::error::{MigrationError, Result};
use crate::graph::schema::source;
use crate::graph::RawGraph;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// Large nested payloads not needed to locate the download URL
const DROPPED_STATE_PROPERTIES: &[&str] = &[
    "attributes.modules",
    "attributes.providers",
    "attributes.resources",
];

/// Download each workspace's current state to `<dir>/<org>/<workspace>.tfstate`
///
/// Failures are logged per workspace; returns the written paths.
pub fn download_state_files(client: &TfcClient, graph: &RawGraph, dir: &Path) -> Vec<PathBuf> {
    info!("Start downloading state files");
    let mut written = Vec::new();
    for workspace in graph.collection(source::WORKSPACES) {
        let (Some(workspace_id), Some(state_version_id)) =
            (workspace.id(), workspace.related_id("current-state-version"))
        else {
            continue;
        };
        let organization_id = workspace.related_id("organization").unwrap_or("unknown");
        let path = dir.join(organization_id).join(format!("{workspace_id}.tfstate"));

        match download_one(client, state_version_id, &path) {
            Ok(()) => {
                debug!(path = %path.display(), "Saved state file");
                written.push(path);
            }
            Err(e) => warn!(workspace = workspace_id, error = %e, "Cannot download state file"),
        }
    }
    info!(count = written.len(), "Stop downloading state files");
    written
}

fn download_one(client: &TfcClient, state_version_id: &str, path: &Path) -> Result<()> {
    let state_version = client
        .fetch_one(
            &FetchRequest::get(
                format!("/state-versions/{state_version_id}"),
                &["attributes.hosted-state-download-url"],
            )
            .drop_properties(DROPPED_STATE_PROPERTIES),
        )?
        .ok_or_else(|| MigrationError::Enrichment(format!("state version '{state_version_id}' not found")))?;
    let url = state_version
        .get_str("attributes.hosted-state-download-url")
        .ok_or_else(|| MigrationError::Enrichment(format!("state version '{state_version_id}' has no download URL")))?;

    // The download is served as an octet stream with escaped unicode; re-encode it.
    let content: serde_json::Value = serde_json::from_str(&client.download_text(url)?)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(&content)?)?;
    Ok(())
}
