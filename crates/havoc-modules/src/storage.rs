//! ---
//! havoc_section: "06-fault-modules"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fault module contract, registry, and built-in variants."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use havoc_config::StorageHealthSettings;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::contract::{FaultModule, ModuleHealth};

/// Read-only SMART health probe. There is nothing to break: inject always
/// fails, and the orchestrator skips the module at baseline instead of
/// counting a round error.
#[derive(Debug)]
pub struct StorageHealth {
    settings: StorageHealthSettings,
    binary: PathBuf,
}

impl StorageHealth {
    pub fn new(settings: StorageHealthSettings) -> Self {
        Self {
            settings,
            binary: PathBuf::from("smartctl"),
        }
    }

    /// Use an explicit smartctl path (tests, unusual installs).
    pub fn with_binary(settings: StorageHealthSettings, binary: PathBuf) -> Self {
        Self { settings, binary }
    }
}

#[async_trait]
impl FaultModule for StorageHealth {
    fn name(&self) -> &'static str {
        "storage-health"
    }

    fn describe(&self) -> String {
        format!(
            "reads SMART health of {} (read-only)",
            self.settings.device.display()
        )
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn check(&self) -> ModuleHealth {
        let device = self.settings.device.display().to_string();
        let output = match Command::new(&self.binary)
            .args(["-H", &device])
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                // Tool absent: treat as pass.
                debug!(module = self.name(), error = %err, "smartctl unavailable; treating as healthy");
                return ModuleHealth::Healthy;
            }
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("FAILED") {
            warn!(module = self.name(), device = %device, "SMART health read reports failure");
            ModuleHealth::Broken
        } else {
            ModuleHealth::Healthy
        }
    }

    async fn inject(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            info!(module = self.name(), "dry-run: read-only module, nothing to break");
        }
        Err(anyhow!("storage-health is read-only; nothing to break"))
    }

    async fn heal(&self) -> Result<()> {
        info!(module = self.name(), "read-only module, nothing to heal");
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        info!(module = self.name(), "read-only module, nothing to restore");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> StorageHealth {
        StorageHealth::with_binary(
            StorageHealthSettings {
                device: PathBuf::from("/dev/sda"),
            },
            PathBuf::from("/nonexistent/smartctl"),
        )
    }

    #[tokio::test]
    async fn absent_tool_reads_as_healthy() {
        assert!(module().check().await.is_healthy());
    }

    #[tokio::test]
    async fn inject_always_fails() {
        assert!(module().inject(false).await.is_err());
        assert!(module().inject(true).await.is_err());
    }

    #[tokio::test]
    async fn module_is_read_only_with_noop_recovery() {
        let module = module();
        assert!(module.read_only());
        module.heal().await.unwrap();
        module.restore().await.unwrap();
    }
}
