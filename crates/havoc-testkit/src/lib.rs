//! ---
//! havoc_section: "10-testing-support"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Shared in-memory fakes for Havoc tests."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use havoc_control::{ContainerRuntime, HealthProbe};
use havoc_modules::{FaultModule, ModuleHealth};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use url::Url;

/// Shared, ordered record of calls made against the fakes. Tests assert on
/// relative positions ("db's restart completed before app's began").
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

#[derive(Debug, Default)]
struct RuntimeState {
    running: IndexMap<String, bool>,
    paused: IndexSet<String>,
    restart_delays: IndexMap<String, u32>,
    failing_restarts: IndexSet<String>,
    calls: Vec<String>,
}

/// Scripted in-memory container runtime.
#[derive(Debug, Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<RuntimeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, name: &str, running: bool) {
        self.state.lock().running.insert(name.to_owned(), running);
    }

    pub fn set_paused(&self, name: &str, paused: bool) {
        let mut state = self.state.lock();
        if paused {
            state.paused.insert(name.to_owned());
        } else {
            state.paused.shift_remove(name);
        }
    }

    /// After a restart, `is_running` answers false for `polls` probes
    /// before the container comes back. Models slow startups.
    pub fn delay_restart(&self, name: &str, polls: u32) {
        self.state
            .lock()
            .restart_delays
            .insert(name.to_owned(), polls);
    }

    /// Make restarts of `name` fail outright.
    pub fn fail_restart(&self, name: &str) {
        self.state.lock().failing_restarts.insert(name.to_owned());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Index of the first call equal to `entry`, if any.
    pub fn call_index(&self, entry: &str) -> Option<usize> {
        self.state.lock().calls.iter().position(|c| c == entry)
    }

    /// Index of the last call equal to `entry`, if any.
    pub fn last_call_index(&self, entry: &str) -> Option<usize> {
        self.state.lock().calls.iter().rposition(|c| c == entry)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn available(&self) -> bool {
        true
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .running
            .iter()
            .filter(|(_, running)| **running)
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls.push(format!("is_running:{name}"));
        if let Some(remaining) = state.restart_delays.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
            state.restart_delays.shift_remove(name);
            state.running.insert(name.to_owned(), true);
            return Ok(true);
        }
        Ok(state.running.get(name).copied().unwrap_or(false))
    }

    async fn is_paused(&self, name: &str) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.paused.contains(name))
    }

    async fn restart(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("restart:{name}"));
        if state.failing_restarts.contains(name) {
            return Err(anyhow!("scripted restart failure for {name}"));
        }
        if !state.restart_delays.contains_key(name) {
            state.running.insert(name.to_owned(), true);
        }
        Ok(())
    }

    async fn pause(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("pause:{name}"));
        state.paused.insert(name.to_owned());
        Ok(())
    }

    async fn unpause(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("unpause:{name}"));
        state.paused.shift_remove(name);
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("stop:{name}"));
        state.running.insert(name.to_owned(), false);
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("start:{name}"));
        state.running.insert(name.to_owned(), true);
        Ok(())
    }
}

/// Scripted health prober keyed by full URL string.
#[derive(Debug, Clone)]
pub struct FakeProbe {
    answers: Arc<Mutex<IndexMap<String, bool>>>,
    default: bool,
}

impl FakeProbe {
    /// Everything unlisted probes healthy.
    pub fn healthy() -> Self {
        Self {
            answers: Arc::new(Mutex::new(IndexMap::new())),
            default: true,
        }
    }

    /// Everything unlisted probes unhealthy.
    pub fn unhealthy() -> Self {
        Self {
            answers: Arc::new(Mutex::new(IndexMap::new())),
            default: false,
        }
    }

    pub fn set(&self, url: &str, healthy: bool) {
        self.answers.lock().insert(url.to_owned(), healthy);
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn healthy(&self, url: &Url) -> bool {
        self.answers
            .lock()
            .get(url.as_str())
            .copied()
            .unwrap_or(self.default)
    }
}

#[derive(Debug)]
struct ScriptedState {
    healthy: bool,
    pending_recovery: Option<u32>,
}

/// Scripted fault module for orchestrator tests. The shared [`CallLog`]
/// records operation order across every module in a round.
pub struct ScriptedModule {
    name: &'static str,
    read_only: bool,
    self_blinding: bool,
    inject_fails: bool,
    heal_fails: bool,
    recover_after: Option<u32>,
    state: Mutex<ScriptedState>,
    log: CallLog,
}

impl ScriptedModule {
    pub fn new(name: &'static str, log: CallLog) -> Self {
        Self {
            name,
            read_only: false,
            self_blinding: false,
            inject_fails: false,
            heal_fails: false,
            recover_after: None,
            state: Mutex::new(ScriptedState {
                healthy: true,
                pending_recovery: None,
            }),
            log,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn self_blinding(mut self) -> Self {
        self.self_blinding = true;
        self
    }

    pub fn inject_fails(mut self) -> Self {
        self.inject_fails = true;
        self
    }

    pub fn heal_fails(mut self) -> Self {
        self.heal_fails = true;
        self
    }

    /// Already unhealthy before the round starts.
    pub fn broken_at_baseline(self) -> Self {
        self.state.lock().healthy = false;
        self
    }

    /// After injection, report broken for `checks` probes, then recover on
    /// the next one.
    pub fn recovers_after(mut self, checks: u32) -> Self {
        self.recover_after = Some(checks);
        self
    }

    pub fn is_currently_healthy(&self) -> bool {
        self.state.lock().healthy
    }
}

#[async_trait]
impl FaultModule for ScriptedModule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn describe(&self) -> String {
        format!("scripted module {}", self.name)
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn self_blinding(&self) -> bool {
        self.self_blinding
    }

    async fn check(&self) -> ModuleHealth {
        self.log.lock().push(format!("check:{}", self.name));
        let mut state = self.state.lock();
        if state.healthy {
            return ModuleHealth::Healthy;
        }
        match state.pending_recovery {
            Some(0) => {
                state.healthy = true;
                state.pending_recovery = None;
                ModuleHealth::Healthy
            }
            Some(ref mut n) => {
                *n -= 1;
                ModuleHealth::Broken
            }
            None => ModuleHealth::Broken,
        }
    }

    async fn inject(&self, dry_run: bool) -> Result<()> {
        self.log.lock().push(format!("inject:{}", self.name));
        if self.inject_fails {
            return Err(anyhow!("scripted injection failure for {}", self.name));
        }
        if !dry_run {
            let mut state = self.state.lock();
            state.healthy = false;
            state.pending_recovery = self.recover_after;
        }
        Ok(())
    }

    async fn heal(&self) -> Result<()> {
        self.log.lock().push(format!("heal:{}", self.name));
        if self.heal_fails {
            return Err(anyhow!("scripted heal failure for {}", self.name));
        }
        let mut state = self.state.lock();
        state.healthy = true;
        state.pending_recovery = None;
        Ok(())
    }

    async fn restore(&self) -> Result<()> {
        self.log.lock().push(format!("restore:{}", self.name));
        let mut state = self.state.lock();
        state.healthy = true;
        state.pending_recovery = None;
        Ok(())
    }
}
