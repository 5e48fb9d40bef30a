//! ---
//! havoc_section: "06-fault-modules"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fault module contract, registry, and built-in variants."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use havoc_config::TunnelStopSettings;
use havoc_control::ContainerRuntime;
use havoc_store::RunStore;
use tracing::{info, warn};

use crate::contract::{FaultModule, ModuleHealth};

const SNAPSHOT_KEY: &str = "state";

/// Stops the tunnel container, severing remote access to the fleet.
#[derive(Debug)]
pub struct TunnelStop {
    settings: TunnelStopSettings,
    runtime: Arc<dyn ContainerRuntime>,
    store: RunStore,
    dry_run: bool,
}

impl TunnelStop {
    pub fn new(
        settings: TunnelStopSettings,
        runtime: Arc<dyn ContainerRuntime>,
        store: RunStore,
        dry_run: bool,
    ) -> Self {
        Self {
            settings,
            runtime,
            store,
            dry_run,
        }
    }
}

#[async_trait]
impl FaultModule for TunnelStop {
    fn name(&self) -> &'static str {
        "tunnel-stop"
    }

    fn describe(&self) -> String {
        format!("stops tunnel container {}", self.settings.container)
    }

    async fn check(&self) -> ModuleHealth {
        match self.runtime.is_running(&self.settings.container).await {
            Ok(true) => ModuleHealth::Healthy,
            Ok(false) => ModuleHealth::Broken,
            Err(err) => {
                warn!(module = self.name(), error = %err, "tunnel state unobservable; treating as healthy");
                ModuleHealth::Healthy
            }
        }
    }

    async fn inject(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            info!(module = self.name(), container = %self.settings.container, "dry-run: would stop container");
            return Ok(());
        }
        self.store
            .put_snapshot(self.name(), SNAPSHOT_KEY, "running")
            .context("failed to snapshot tunnel state")?;
        self.runtime
            .stop(&self.settings.container)
            .await
            .with_context(|| format!("unable to stop {}", self.settings.container))?;
        info!(module = self.name(), container = %self.settings.container, "container stopped");
        Ok(())
    }

    async fn heal(&self) -> Result<()> {
        if self.dry_run {
            info!(module = self.name(), "dry-run: would start container");
            return Ok(());
        }
        self.runtime
            .start(&self.settings.container)
            .await
            .with_context(|| format!("unable to start {}", self.settings.container))?;
        if !self.check().await.is_healthy() {
            return Err(anyhow!("{} not running after heal", self.settings.container));
        }
        self.store.remove_snapshot(self.name(), SNAPSHOT_KEY)?;
        info!(module = self.name(), container = %self.settings.container, "container started");
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        if self.dry_run {
            info!(module = self.name(), "dry-run: would start container from snapshot");
            return Ok(());
        }
        if self.store.get_snapshot(self.name(), SNAPSHOT_KEY)?.is_none() {
            return Err(anyhow!("no tunnel snapshot to restore"));
        }
        if !self.runtime.is_running(&self.settings.container).await? {
            self.runtime
                .start(&self.settings.container)
                .await
                .with_context(|| format!("unable to start {}", self.settings.container))?;
        }
        self.store.remove_snapshot(self.name(), SNAPSHOT_KEY)?;
        info!(module = self.name(), container = %self.settings.container, "tunnel state restored");
        Ok(())
    }
}
