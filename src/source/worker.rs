//! Ephemeral agent workers
//!
//! A worker is a short-lived agent container bound to a temporary agent pool.
//! [`DockerLauncher`] drives the docker CLI; tests substitute their own
//! [`WorkerLauncher`].

use crate::error::{MigrationError, Result};
use std::process::Command;
use tracing::debug;

/// A running ephemeral worker
pub trait Worker {
    fn id(&self) -> &str;
    fn is_running(&self) -> bool;
    fn logs(&self) -> Result<String>;
    fn stop(&mut self) -> Result<()>;
}

/// Starts workers for an agent pool token
pub trait WorkerLauncher {
    /// Whether the side channel can be used at all
    fn is_available(&self) -> bool;
    fn launch(&self, name: &str, token: &str) -> Result<Box<dyn Worker>>;
}

/// Launches the agent image through the docker CLI
pub struct DockerLauncher {
    image: String,
}

impl DockerLauncher {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

fn docker(args: &[&str]) -> Result<String> {
    let output = Command::new("docker")
        .args(args)
        .output()
        .map_err(|e| MigrationError::Worker(format!("cannot run docker: {e}")))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(MigrationError::Worker(format!(
            "docker {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

impl WorkerLauncher for DockerLauncher {
    fn is_available(&self) -> bool {
        which::which("docker").is_ok() && docker(&["ps"]).is_ok()
    }

    fn launch(&self, name: &str, token: &str) -> Result<Box<dyn Worker>> {
        // The token is passed through the environment so it stays off the command line.
        let output = Command::new("docker")
            .args([
                "run",
                "--detach",
                "--rm",
                "--pull",
                "always",
                "--name",
                name,
                "--env",
                "TFC_AGENT_NAME=SMK-Agent",
                "--env",
                "TFC_AGENT_TOKEN",
                self.image.as_str(),
            ])
            .env("TFC_AGENT_TOKEN", token)
            .output()
            .map_err(|e| MigrationError::Worker(format!("cannot run docker: {e}")))?;
        if !output.status.success() {
            return Err(MigrationError::Worker(format!(
                "cannot start agent container '{name}': {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(container = %id, image = %self.image, "Started agent container");
        Ok(Box::new(DockerWorker { id }))
    }
}

/// A container started by [`DockerLauncher`]
pub struct DockerWorker {
    id: String,
}

impl Worker for DockerWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_running(&self) -> bool {
        docker(&["inspect", "--format", "{{.State.Running}}", self.id.as_str()])
            .map(|state| state == "true")
            .unwrap_or(false)
    }

    fn logs(&self) -> Result<String> {
        let output = Command::new("docker")
            .args(["logs", self.id.as_str()])
            .output()
            .map_err(|e| MigrationError::Worker(format!("cannot run docker: {e}")))?;
        Ok(format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ))
    }

    fn stop(&mut self) -> Result<()> {
        debug!(container = %self.id, "Stopping agent container");
        docker(&["stop", self.id.as_str()]).map(|_| ())
    }
}
