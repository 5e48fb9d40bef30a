//! ---
//! havoc_section: "06-fault-modules"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fault module contract, registry, and built-in variants."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use anyhow::Result;
use async_trait::async_trait;

/// Answer from a module's fast, side-effect-free probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleHealth {
    Healthy,
    Broken,
}

impl ModuleHealth {
    pub fn is_healthy(self) -> bool {
        matches!(self, ModuleHealth::Healthy)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleHealth::Healthy => "healthy",
            ModuleHealth::Broken => "broken",
        }
    }
}

impl std::fmt::Display for ModuleHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pluggable failure scenario.
///
/// Contract per operation:
/// * `check` is fast and side-effect-free; an unobservable subject reports
///   `Healthy` (cannot prove damage ⇒ pass).
/// * `inject` snapshots prior state into the run store before mutating
///   anything; under dry-run it logs the would-be action and mutates
///   nothing.
/// * `heal` undoes the fault and re-verifies via `check` before declaring
///   success; success clears the snapshot.
/// * `restore` is last-resort recovery from the latest snapshot; a missing
///   snapshot on a mutating module is an error without mutation.
#[async_trait]
pub trait FaultModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Side-effect-free, human-readable summary of what breaking this
    /// module does.
    fn describe(&self) -> String;

    /// Module never mutates anything; its inject always fails and the
    /// orchestrator skips it at baseline without counting a round error.
    fn read_only(&self) -> bool {
        false
    }

    /// Breaking this module can blind our own control-plane access; the
    /// orchestrator always orders it last within a round.
    fn self_blinding(&self) -> bool {
        false
    }

    async fn check(&self) -> ModuleHealth;

    async fn inject(&self, dry_run: bool) -> Result<()>;

    async fn heal(&self) -> Result<()>;

    async fn restore(&self) -> Result<()>;
}
