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
use havoc_config::DbPauseSettings;
use havoc_control::ContainerRuntime;
use havoc_store::RunStore;
use tracing::{info, warn};

use crate::contract::{FaultModule, ModuleHealth};

const SNAPSHOT_KEY: &str = "state";

/// Freezes the database container with the runtime's pause facility. The
/// process keeps its memory and sockets; clients just stop getting answers.
#[derive(Debug)]
pub struct DbPause {
    settings: DbPauseSettings,
    runtime: Arc<dyn ContainerRuntime>,
    store: RunStore,
    dry_run: bool,
}

impl DbPause {
    pub fn new(
        settings: DbPauseSettings,
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
impl FaultModule for DbPause {
    fn name(&self) -> &'static str {
        "db-pause"
    }

    fn describe(&self) -> String {
        format!("pauses database container {}", self.settings.container)
    }

    async fn check(&self) -> ModuleHealth {
        match self.runtime.is_paused(&self.settings.container).await {
            Ok(true) => ModuleHealth::Broken,
            Ok(false) => ModuleHealth::Healthy,
            Err(err) => {
                warn!(module = self.name(), error = %err, "pause state unobservable; treating as healthy");
                ModuleHealth::Healthy
            }
        }
    }

    async fn inject(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            info!(module = self.name(), container = %self.settings.container, "dry-run: would pause container");
            return Ok(());
        }
        self.store
            .put_snapshot(self.name(), SNAPSHOT_KEY, "running")
            .context("failed to snapshot pause state")?;
        self.runtime
            .pause(&self.settings.container)
            .await
            .with_context(|| format!("unable to pause {}", self.settings.container))?;
        info!(module = self.name(), container = %self.settings.container, "container paused");
        Ok(())
    }

    async fn heal(&self) -> Result<()> {
        if self.dry_run {
            info!(module = self.name(), "dry-run: would unpause container");
            return Ok(());
        }
        self.runtime
            .unpause(&self.settings.container)
            .await
            .with_context(|| format!("unable to unpause {}", self.settings.container))?;
        if !self.check().await.is_healthy() {
            return Err(anyhow!("{} still paused after heal", self.settings.container));
        }
        self.store.remove_snapshot(self.name(), SNAPSHOT_KEY)?;
        info!(module = self.name(), container = %self.settings.container, "container unpaused");
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        if self.dry_run {
            info!(module = self.name(), "dry-run: would unpause container from snapshot");
            return Ok(());
        }
        if self.store.get_snapshot(self.name(), SNAPSHOT_KEY)?.is_none() {
            return Err(anyhow!("no pause snapshot to restore"));
        }
        // The container may already be unpaused; only act when needed.
        if self.runtime.is_paused(&self.settings.container).await? {
            self.runtime
                .unpause(&self.settings.container)
                .await
                .with_context(|| format!("unable to unpause {}", self.settings.container))?;
        }
        self.store.remove_snapshot(self.name(), SNAPSHOT_KEY)?;
        info!(module = self.name(), container = %self.settings.container, "pause state restored");
        Ok(())
    }
}
