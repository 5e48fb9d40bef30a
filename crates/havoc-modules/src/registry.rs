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

use anyhow::{anyhow, Result};
use havoc_config::ModuleSettings;
use havoc_control::ContainerRuntime;
use havoc_store::RunStore;
use indexmap::IndexMap;
use tracing::debug;

use crate::contract::FaultModule;
use crate::{DbPause, DiskFill, DnsPoison, SockPerms, StorageHealth, TunnelStop};

/// Typed, ordered name→implementation map. Registration order is the
/// default injection order; duplicate registration is a startup error,
/// before any injection.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, Arc<dyn FaultModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Arc<dyn FaultModule>) -> Result<()> {
        let name = module.name().to_owned();
        if self.modules.contains_key(&name) {
            return Err(anyhow!("module {name} registered twice"));
        }
        debug!(module = %name, "module registered");
        self.modules.insert(name, module);
        Ok(())
    }

    /// Resolve a module by name. Unknown names are fatal at resolution
    /// time, before any state mutation.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn FaultModule>> {
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown module {name}"))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FaultModule>> {
        self.modules.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

/// Assemble the built-in module set. With an `enabled` list the subset is
/// registered in the listed order; otherwise every built-in registers in
/// canonical order.
pub fn builtin_registry(
    settings: &ModuleSettings,
    store: RunStore,
    runtime: Arc<dyn ContainerRuntime>,
    dry_run: bool,
) -> Result<ModuleRegistry> {
    let mut catalogue: IndexMap<&'static str, Arc<dyn FaultModule>> = IndexMap::new();
    catalogue.insert(
        "dns-poison",
        Arc::new(DnsPoison::new(
            settings.dns_poison.clone(),
            store.clone(),
            dry_run,
        )),
    );
    catalogue.insert(
        "db-pause",
        Arc::new(DbPause::new(
            settings.db_pause.clone(),
            runtime.clone(),
            store.clone(),
            dry_run,
        )),
    );
    catalogue.insert(
        "tunnel-stop",
        Arc::new(TunnelStop::new(
            settings.tunnel_stop.clone(),
            runtime.clone(),
            store.clone(),
            dry_run,
        )),
    );
    catalogue.insert(
        "disk-fill",
        Arc::new(DiskFill::new(
            settings.disk_fill.clone(),
            store.clone(),
            dry_run,
        )),
    );
    catalogue.insert(
        "storage-health",
        Arc::new(StorageHealth::new(settings.storage_health.clone())),
    );
    catalogue.insert(
        "sock-perms",
        Arc::new(SockPerms::new(
            settings.sock_perms.clone(),
            store.clone(),
            dry_run,
        )),
    );

    let mut registry = ModuleRegistry::new();
    if settings.enabled.is_empty() {
        for (_, module) in catalogue {
            registry.register(module)?;
        }
    } else {
        for name in &settings.enabled {
            let module = catalogue
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| anyhow!("unknown module {name} in modules.enabled"))?;
            registry.register(module)?;
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PocketRuntime;

    fn registry_with(enabled: &[&str]) -> Result<ModuleRegistry> {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(PocketRuntime::default());
        let settings = ModuleSettings {
            enabled: enabled.iter().map(|s| (*s).to_owned()).collect(),
            ..ModuleSettings::default()
        };
        builtin_registry(&settings, store, runtime, false)
    }

    #[test]
    fn builtins_register_in_canonical_order() {
        let registry = registry_with(&[]).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "dns-poison",
                "db-pause",
                "tunnel-stop",
                "disk-fill",
                "storage-health",
                "sock-perms",
            ]
        );
    }

    #[test]
    fn enabled_subset_keeps_listed_order() {
        let registry = registry_with(&["disk-fill", "db-pause"]).unwrap();
        assert_eq!(registry.names(), vec!["disk-fill", "db-pause"]);
    }

    #[test]
    fn unknown_enabled_module_is_fatal() {
        let err = registry_with(&["db-pause", "chaos-monkey"]).unwrap_err();
        assert!(err.to_string().contains("chaos-monkey"));
    }

    #[test]
    fn duplicate_enabled_module_is_fatal() {
        let err = registry_with(&["db-pause", "db-pause"]).unwrap_err();
        assert!(err.to_string().contains("registered twice"));
    }

    #[test]
    fn resolve_unknown_name_is_fatal() {
        let registry = registry_with(&[]).unwrap();
        assert!(registry.resolve("does-not-exist").is_err());
        assert!(registry.resolve("sock-perms").is_ok());
    }
}
