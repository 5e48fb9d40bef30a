//! ---
//! havoc_section: "06-fault-modules"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fault module contract, registry, and built-in variants."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::fs;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use havoc_config::DnsPoisonSettings;
use havoc_store::RunStore;
use tracing::{debug, info};

use crate::contract::{FaultModule, ModuleHealth};

const SNAPSHOT_KEY: &str = "hosts";
const POISON_TAG: &str = "# havoc-dns-poison";

/// Poisons name resolution by pointing a well-known name at a black-hole
/// address through the hosts file.
#[derive(Debug)]
pub struct DnsPoison {
    settings: DnsPoisonSettings,
    store: RunStore,
    dry_run: bool,
}

impl DnsPoison {
    pub fn new(settings: DnsPoisonSettings, store: RunStore, dry_run: bool) -> Self {
        Self {
            settings,
            store,
            dry_run,
        }
    }

    fn poison_line(&self) -> String {
        format!(
            "{} {} {POISON_TAG}",
            self.settings.sink_address, self.settings.probe_host
        )
    }
}

#[async_trait]
impl FaultModule for DnsPoison {
    fn name(&self) -> &'static str {
        "dns-poison"
    }

    fn describe(&self) -> String {
        format!(
            "poisons resolution of {} to {} via {}",
            self.settings.probe_host,
            self.settings.sink_address,
            self.settings.hosts_file.display()
        )
    }

    async fn check(&self) -> ModuleHealth {
        match fs::read_to_string(&self.settings.hosts_file) {
            Ok(contents) => {
                if contents.lines().any(|line| line.ends_with(POISON_TAG)) {
                    ModuleHealth::Broken
                } else {
                    ModuleHealth::Healthy
                }
            }
            Err(err) => {
                debug!(hosts = %self.settings.hosts_file.display(), error = %err, "hosts file unreadable; treating as healthy");
                ModuleHealth::Healthy
            }
        }
    }

    async fn inject(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            info!(module = self.name(), line = %self.poison_line(), "dry-run: would append poison entry");
            return Ok(());
        }
        let path = &self.settings.hosts_file;
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read hosts file {}", path.display()))?;
        self.store
            .put_snapshot(self.name(), SNAPSHOT_KEY, &contents)
            .context("failed to snapshot hosts file")?;

        let mut poisoned = contents.clone();
        if !poisoned.ends_with('\n') && !poisoned.is_empty() {
            poisoned.push('\n');
        }
        poisoned.push_str(&self.poison_line());
        poisoned.push('\n');
        fs::write(path, poisoned)
            .with_context(|| format!("unable to write hosts file {}", path.display()))?;
        info!(module = self.name(), host = %self.settings.probe_host, "poison entry appended");
        Ok(())
    }

    async fn heal(&self) -> Result<()> {
        if self.dry_run {
            info!(module = self.name(), "dry-run: would strip poison entries");
            return Ok(());
        }
        let path = &self.settings.hosts_file;
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read hosts file {}", path.display()))?;
        let cleaned = contents
            .lines()
            .filter(|line| !line.ends_with(POISON_TAG))
            .collect::<Vec<_>>()
            .join("\n");
        let mut cleaned = cleaned;
        if !cleaned.is_empty() {
            cleaned.push('\n');
        }
        fs::write(path, cleaned)
            .with_context(|| format!("unable to write hosts file {}", path.display()))?;

        if !self.check().await.is_healthy() {
            return Err(anyhow!("poison entry still present after heal"));
        }
        self.store.remove_snapshot(self.name(), SNAPSHOT_KEY)?;
        info!(module = self.name(), "poison entries stripped");
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        if self.dry_run {
            info!(module = self.name(), "dry-run: would restore hosts file from snapshot");
            return Ok(());
        }
        let Some(original) = self.store.get_snapshot(self.name(), SNAPSHOT_KEY)? else {
            return Err(anyhow!("no hosts snapshot to restore"));
        };
        let path = &self.settings.hosts_file;
        fs::write(path, original)
            .with_context(|| format!("unable to restore hosts file {}", path.display()))?;
        self.store.remove_snapshot(self.name(), SNAPSHOT_KEY)?;
        info!(module = self.name(), "hosts file restored from snapshot");
        Ok(())
    }
}
