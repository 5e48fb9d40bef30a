//! ---
//! havoc_section: "05-control-plane"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Container control-plane client and health probing."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::ContainerRuntime;

/// Docker CLI wrapper. Output is read through `--format` templates, the
/// documented stable surface of the CLI. Every call captures stderr so a
/// failure carries the daemon's own words.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
    available: bool,
}

impl DockerCli {
    /// Locate the docker binary on PATH. An absent binary is not an error:
    /// the drill degrades to pass-through probes with a warning.
    pub fn detect() -> Self {
        let binary = PathBuf::from("docker");
        let available = which(&binary);
        if !available {
            warn!("docker binary not found; container probes will be treated as passing");
        }
        Self { binary, available }
    }

    /// Use an explicit binary path (tests, unusual installs).
    pub fn with_binary(binary: PathBuf) -> Self {
        let available = which(&binary);
        Self { binary, available }
    }

    async fn output(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| anyhow!("failed to spawn {}: {err}", self.binary.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "docker {} failed ({}): {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_quiet(&self, args: &[&str]) -> Result<()> {
        if !self.available {
            warn!(?args, "docker absent; skipping control-plane call");
            return Ok(());
        }
        self.output(args).await.map(|_| ())
    }

    /// `docker inspect` with a single-field template. "No such object" is a
    /// normal answer (`Ok(None)`), daemon trouble is an error.
    async fn inspect_field(&self, name: &str, template: &str) -> Result<Option<String>> {
        let output = Command::new(&self.binary)
            .args(["inspect", "--format", template, name])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| anyhow!("failed to spawn {}: {err}", self.binary.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such object") || stderr.contains("No such container") {
                return Ok(None);
            }
            return Err(anyhow!("docker inspect {name} failed: {}", stderr.trim()));
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_owned()))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn available(&self) -> bool {
        self.available
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        if !self.available {
            return Ok(Vec::new());
        }
        let stdout = self.output(&["ps", "--format", "{{.Names}}"]).await?;
        let names = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect::<Vec<_>>();
        debug!(count = names.len(), "enumerated running containers");
        Ok(names)
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        if !self.available {
            return Ok(true);
        }
        match self.inspect_field(name, "{{.State.Running}}").await? {
            Some(value) => Ok(value == "true"),
            None => Ok(false),
        }
    }

    async fn is_paused(&self, name: &str) -> Result<bool> {
        if !self.available {
            return Ok(false);
        }
        match self.inspect_field(name, "{{.State.Paused}}").await? {
            Some(value) => Ok(value == "true"),
            None => Ok(false),
        }
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.run_quiet(&["restart", name]).await
    }

    async fn pause(&self, name: &str) -> Result<()> {
        self.run_quiet(&["pause", name]).await
    }

    async fn unpause(&self, name: &str) -> Result<()> {
        self.run_quiet(&["unpause", name]).await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.run_quiet(&["stop", name]).await
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.run_quiet(&["start", name]).await
    }
}

fn which(binary: &std::path::Path) -> bool {
    if binary.is_absolute() {
        return binary.exists();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file())
}
