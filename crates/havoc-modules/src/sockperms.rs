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
use std::os::unix::fs::PermissionsExt;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use havoc_config::SockPermsSettings;
use havoc_store::RunStore;
use tracing::{debug, info};

use crate::contract::{FaultModule, ModuleHealth};

const SNAPSHOT_KEY: &str = "mode";
const FALLBACK_MODE: u32 = 0o660;

/// Strips all permission bits from the control-plane socket. Everything
/// talking to the runtime through that socket goes blind, including this
/// process; the orchestrator therefore injects this module last.
#[derive(Debug)]
pub struct SockPerms {
    settings: SockPermsSettings,
    store: RunStore,
    dry_run: bool,
}

impl SockPerms {
    pub fn new(settings: SockPermsSettings, store: RunStore, dry_run: bool) -> Self {
        Self {
            settings,
            store,
            dry_run,
        }
    }

    fn current_mode(&self) -> Option<u32> {
        fs::metadata(&self.settings.socket_path)
            .ok()
            .map(|meta| meta.permissions().mode() & 0o777)
    }

    fn chmod(&self, mode: u32) -> Result<()> {
        let path = &self.settings.socket_path;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("unable to chmod {}", path.display()))
    }
}

#[async_trait]
impl FaultModule for SockPerms {
    fn name(&self) -> &'static str {
        "sock-perms"
    }

    fn describe(&self) -> String {
        format!(
            "corrupts permissions on control socket {}",
            self.settings.socket_path.display()
        )
    }

    fn self_blinding(&self) -> bool {
        true
    }

    async fn check(&self) -> ModuleHealth {
        match self.current_mode() {
            Some(0) => ModuleHealth::Broken,
            Some(_) => ModuleHealth::Healthy,
            None => {
                debug!(socket = %self.settings.socket_path.display(), "socket absent; treating as healthy");
                ModuleHealth::Healthy
            }
        }
    }

    async fn inject(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            info!(module = self.name(), socket = %self.settings.socket_path.display(), "dry-run: would chmod socket to 000");
            return Ok(());
        }
        let mode = self
            .current_mode()
            .ok_or_else(|| anyhow!("socket {} not found", self.settings.socket_path.display()))?;
        self.store
            .put_snapshot(self.name(), SNAPSHOT_KEY, &format!("{mode:o}"))
            .context("failed to snapshot socket mode")?;
        self.chmod(0)?;
        info!(module = self.name(), prior_mode = %format!("{mode:o}"), "socket permissions stripped");
        Ok(())
    }

    async fn heal(&self) -> Result<()> {
        if self.dry_run {
            info!(module = self.name(), "dry-run: would restore socket permissions");
            return Ok(());
        }
        let mode = match self.store.get_snapshot(self.name(), SNAPSHOT_KEY)? {
            Some(raw) => u32::from_str_radix(raw.trim(), 8)
                .with_context(|| format!("corrupt mode snapshot {raw:?}"))?,
            None => FALLBACK_MODE,
        };
        self.chmod(mode)?;
        if !self.check().await.is_healthy() {
            return Err(anyhow!("socket permissions still stripped after heal"));
        }
        self.store.remove_snapshot(self.name(), SNAPSHOT_KEY)?;
        info!(module = self.name(), mode = %format!("{mode:o}"), "socket permissions healed");
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        if self.dry_run {
            info!(module = self.name(), "dry-run: would restore socket permissions from snapshot");
            return Ok(());
        }
        let Some(raw) = self.store.get_snapshot(self.name(), SNAPSHOT_KEY)? else {
            return Err(anyhow!("no socket mode snapshot to restore"));
        };
        let mode = u32::from_str_radix(raw.trim(), 8)
            .with_context(|| format!("corrupt mode snapshot {raw:?}"))?;
        self.chmod(mode)?;
        self.store.remove_snapshot(self.name(), SNAPSHOT_KEY)?;
        info!(module = self.name(), mode = %format!("{mode:o}"), "socket permissions restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(dir: &tempfile::TempDir, dry_run: bool) -> (SockPerms, std::path::PathBuf) {
        let socket = dir.path().join("control.sock");
        fs::write(&socket, b"").unwrap();
        fs::set_permissions(&socket, fs::Permissions::from_mode(0o660)).unwrap();
        let settings = SockPermsSettings {
            socket_path: socket.clone(),
        };
        let store = RunStore::open(dir.path()).unwrap();
        (SockPerms::new(settings, store, dry_run), socket)
    }

    fn mode_of(path: &std::path::Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[tokio::test]
    async fn inject_strips_and_heal_restores_prior_mode() {
        let dir = tempfile::tempdir().unwrap();
        let (module, socket) = module(&dir, false);

        assert!(module.check().await.is_healthy());
        module.inject(false).await.unwrap();
        assert_eq!(mode_of(&socket), 0);
        assert!(!module.check().await.is_healthy());

        module.heal().await.unwrap();
        assert_eq!(mode_of(&socket), 0o660);
        assert!(module.check().await.is_healthy());
    }

    #[tokio::test]
    async fn heal_without_snapshot_uses_fallback_mode() {
        let dir = tempfile::tempdir().unwrap();
        let (module, socket) = module(&dir, false);
        fs::set_permissions(&socket, fs::Permissions::from_mode(0)).unwrap();

        module.heal().await.unwrap();
        assert_eq!(mode_of(&socket), FALLBACK_MODE);
    }

    #[tokio::test]
    async fn restore_without_snapshot_fails_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let (module, socket) = module(&dir, false);
        assert!(module.restore().await.is_err());
        assert_eq!(mode_of(&socket), 0o660);
    }

    #[tokio::test]
    async fn module_is_self_blinding() {
        let dir = tempfile::tempdir().unwrap();
        let (module, _socket) = module(&dir, false);
        assert!(module.self_blinding());
        assert!(!module.read_only());
    }

    #[tokio::test]
    async fn dry_run_leaves_mode_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (module, socket) = module(&dir, true);
        module.inject(true).await.unwrap();
        module.heal().await.unwrap();
        assert!(module.restore().await.is_ok());
        assert_eq!(mode_of(&socket), 0o660);
    }
}
