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
use std::io::Write;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use havoc_config::DiskFillSettings;
use havoc_store::RunStore;
use tracing::{debug, info};

use crate::contract::{FaultModule, ModuleHealth};

const SNAPSHOT_KEY: &str = "ballast";
const CHUNK: usize = 1024 * 1024;
const ENOSPC: i32 = 28;

/// Fills the target filesystem with a ballast file. Hitting the device's
/// actual capacity mid-write is the intended outcome, not a failure.
#[derive(Debug)]
pub struct DiskFill {
    settings: DiskFillSettings,
    store: RunStore,
    dry_run: bool,
}

impl DiskFill {
    pub fn new(settings: DiskFillSettings, store: RunStore, dry_run: bool) -> Self {
        Self {
            settings,
            store,
            dry_run,
        }
    }

    fn remove_ballast(&self) -> Result<()> {
        match fs::remove_file(&self.settings.ballast_file) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!(
                    "unable to remove ballast {}",
                    self.settings.ballast_file.display()
                )
            }),
        }
    }
}

#[async_trait]
impl FaultModule for DiskFill {
    fn name(&self) -> &'static str {
        "disk-fill"
    }

    fn describe(&self) -> String {
        format!(
            "fills disk with {} MiB ballast at {}",
            self.settings.fill_mb,
            self.settings.ballast_file.display()
        )
    }

    async fn check(&self) -> ModuleHealth {
        if self.settings.ballast_file.exists() {
            ModuleHealth::Broken
        } else {
            ModuleHealth::Healthy
        }
    }

    async fn inject(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            info!(
                module = self.name(),
                mb = self.settings.fill_mb,
                ballast = %self.settings.ballast_file.display(),
                "dry-run: would write ballast file"
            );
            return Ok(());
        }
        let path = &self.settings.ballast_file;
        self.store
            .put_snapshot(self.name(), SNAPSHOT_KEY, &path.display().to_string())
            .context("failed to snapshot ballast path")?;

        let mut file = fs::File::create(path)
            .with_context(|| format!("unable to create ballast {}", path.display()))?;
        let chunk = vec![0u8; CHUNK];
        let mut written_mb = 0;
        for _ in 0..self.settings.fill_mb {
            match file.write_all(&chunk) {
                Ok(()) => written_mb += 1,
                Err(err) if err.raw_os_error() == Some(ENOSPC) => {
                    debug!(module = self.name(), written_mb, "device filled before ballast target");
                    break;
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("ballast write to {} failed", path.display()));
                }
            }
        }
        info!(module = self.name(), written_mb, "ballast written");
        Ok(())
    }

    async fn heal(&self) -> Result<()> {
        if self.dry_run {
            info!(module = self.name(), "dry-run: would remove ballast file");
            return Ok(());
        }
        self.remove_ballast()?;
        if !self.check().await.is_healthy() {
            return Err(anyhow!("ballast still present after heal"));
        }
        self.store.remove_snapshot(self.name(), SNAPSHOT_KEY)?;
        info!(module = self.name(), "ballast removed");
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        if self.dry_run {
            info!(module = self.name(), "dry-run: would remove ballast from snapshot");
            return Ok(());
        }
        let Some(path) = self.store.get_snapshot(self.name(), SNAPSHOT_KEY)? else {
            return Err(anyhow!("no ballast snapshot to restore"));
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("unable to remove ballast {path}"));
            }
        }
        self.store.remove_snapshot(self.name(), SNAPSHOT_KEY)?;
        info!(module = self.name(), ballast = %path, "ballast restored away");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(dir: &tempfile::TempDir, fill_mb: u64) -> DiskFill {
        let settings = DiskFillSettings {
            ballast_file: dir.path().join("ballast"),
            fill_mb,
        };
        let store = RunStore::open(dir.path()).unwrap();
        DiskFill::new(settings, store, false)
    }

    #[tokio::test]
    async fn inject_writes_ballast_and_heal_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let module = module(&dir, 2);

        assert!(module.check().await.is_healthy());
        module.inject(false).await.unwrap();
        assert!(!module.check().await.is_healthy());
        let size = fs::metadata(dir.path().join("ballast")).unwrap().len();
        assert_eq!(size, 2 * 1024 * 1024);

        module.heal().await.unwrap();
        assert!(module.check().await.is_healthy());
        assert!(!dir.path().join("ballast").exists());
    }

    #[tokio::test]
    async fn restore_tolerates_already_removed_ballast() {
        let dir = tempfile::tempdir().unwrap();
        let module = module(&dir, 1);
        module.inject(false).await.unwrap();
        fs::remove_file(dir.path().join("ballast")).unwrap();
        module.restore().await.unwrap();
        assert!(module.check().await.is_healthy());
    }

    #[tokio::test]
    async fn restore_without_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let module = module(&dir, 1);
        assert!(module.restore().await.is_err());
    }
}
