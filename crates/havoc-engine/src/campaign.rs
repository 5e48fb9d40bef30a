//! ---
//! havoc_section: "08-campaign-orchestration"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Campaign orchestration, reporting, and metrics."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use havoc_alert::{AlertLevel, CooldownGate};
use havoc_config::{FleetStrategy, HavocConfig};
use havoc_control::{ContainerRuntime, HealthProbe};
use havoc_fleet::{verify_fleet, BlastRadius, FleetGraph, FleetHealer, RecoveryStatus, SteadyState};
use havoc_modules::{FaultModule, ModuleRegistry};
use havoc_store::RunStore;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::metrics::CampaignMetrics;
use crate::report::{
    CampaignReport, ModuleOutcome, ModuleRoundResult, RoundReport, SteadyCounts,
};

/// Per-invocation knobs, assembled from configuration plus CLI overrides.
#[derive(Debug, Clone)]
pub struct CampaignOptions {
    pub rounds: u32,
    /// Restrict the drill to these modules, in the given order.
    pub module_filter: Option<Vec<String>>,
    /// Invoke heal() during recovery polling instead of waiting for the
    /// fault to clear on its own.
    pub self_heal: bool,
    pub dry_run: bool,
    pub fleet_check: bool,
    pub round_timeout: Duration,
    pub poll_interval: Duration,
    pub strategy: FleetStrategy,
}

impl CampaignOptions {
    pub fn from_config(config: &HavocConfig) -> Self {
        Self {
            rounds: config.campaign.rounds,
            module_filter: None,
            self_heal: config.campaign.self_heal,
            dry_run: false,
            fleet_check: config.campaign.fleet_check,
            round_timeout: config.campaign.round_timeout,
            poll_interval: config.campaign.poll_interval,
            strategy: config.campaign.fleet_strategy,
        }
    }
}

/// The round loop. Owns every round-scoped structure explicitly; the only
/// state shared with the interruption path is the currently-broken set.
pub struct Campaign {
    registry: ModuleRegistry,
    selected: Vec<Arc<dyn FaultModule>>,
    graph: FleetGraph,
    store: RunStore,
    alerts: CooldownGate,
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HealthProbe>,
    impact: IndexMap<String, Vec<String>>,
    options: CampaignOptions,
    metrics: Option<CampaignMetrics>,
    broken: Arc<Mutex<IndexSet<String>>>,
}

impl Campaign {
    /// Resolve the module subset up front: an unknown name is fatal here,
    /// before any state mutation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: ModuleRegistry,
        graph: FleetGraph,
        store: RunStore,
        alerts: CooldownGate,
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn HealthProbe>,
        impact: IndexMap<String, Vec<String>>,
        options: CampaignOptions,
        metrics: Option<CampaignMetrics>,
    ) -> Result<Self> {
        let selected = match &options.module_filter {
            Some(names) => {
                let mut selected = Vec::with_capacity(names.len());
                for name in names {
                    selected.push(registry.resolve(name)?);
                }
                selected
            }
            None => registry.iter().cloned().collect(),
        };
        Ok(Self {
            registry,
            selected,
            graph,
            store,
            alerts,
            runtime,
            probe,
            impact,
            options,
            metrics,
            broken: Arc::new(Mutex::new(IndexSet::new())),
        })
    }

    /// Module names broken right now, for the interruption handler and the
    /// end-of-run cleanup.
    pub fn still_broken(&self) -> Vec<String> {
        self.broken.lock().iter().cloned().collect()
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Run the full campaign. Component failures become statuses; nothing
    /// in here aborts the loop.
    pub async fn run(&mut self) -> CampaignReport {
        info!(
            rounds = self.options.rounds,
            modules = self.selected.len(),
            tracked = self.graph.len(),
            dry_run = self.options.dry_run,
            "campaign starting"
        );
        let mut report = CampaignReport::default();
        for index in 1..=self.options.rounds {
            let round = self.run_round(index).await;
            if let Some(metrics) = &self.metrics {
                metrics.inc_round();
            }
            report.absorb_round(round);
        }
        info!(succeeded = report.succeeded(), "campaign complete");
        report
    }

    async fn run_round(&mut self, index: u32) -> RoundReport {
        info!(round = index, "round starting");

        // Baseline: capture steady state strictly before any injection.
        let steady = if self.options.fleet_check {
            let steady =
                SteadyState::capture(&self.graph, self.runtime.as_ref(), self.probe.as_ref())
                    .await;
            if let Err(err) = steady.persist(&self.store) {
                warn!(error = %err, "failed to persist steady-state baseline");
            }
            Some(steady)
        } else {
            None
        };

        let mut results: Vec<ModuleRoundResult> = Vec::new();
        let mut to_break: Vec<Arc<dyn FaultModule>> = Vec::new();
        for module in &self.selected {
            if module.read_only() {
                info!(module = module.name(), "skipping read-only module");
                results.push(ModuleRoundResult {
                    module: module.name().to_owned(),
                    outcome: ModuleOutcome::SkippedReadOnly,
                });
                continue;
            }
            if !module.check().await.is_healthy() {
                self.alerts
                    .notify(
                        &format!("baseline-unhealthy:{}", module.name()),
                        &format!("module {} unhealthy before injection; skipping", module.name()),
                        AlertLevel::Warn,
                    )
                    .await;
                results.push(ModuleRoundResult {
                    module: module.name().to_owned(),
                    outcome: ModuleOutcome::SkippedUnhealthy,
                });
                continue;
            }
            to_break.push(module.clone());
        }

        // Ordered break: the self-blinding module goes last so its effect
        // cannot hide the outcome of the other injections.
        to_break.sort_by_key(|module| module.self_blinding());

        let mut injected: Vec<Arc<dyn FaultModule>> = Vec::new();
        for module in &to_break {
            match module.inject(self.options.dry_run).await {
                Ok(()) => {
                    info!(module = module.name(), dry_run = self.options.dry_run, "fault injected");
                    self.broken.lock().insert(module.name().to_owned());
                    injected.push(module.clone());
                }
                Err(err) => {
                    warn!(module = module.name(), error = %err, "injection failed; module excluded from poll");
                    self.alerts
                        .notify(
                            &format!("inject-failed:{}", module.name()),
                            &format!("module {} injection failed: {err}", module.name()),
                            AlertLevel::Error,
                        )
                        .await;
                    if let Some(metrics) = &self.metrics {
                        metrics.observe_module(module.name(), "inject-failed", None);
                    }
                    results.push(ModuleRoundResult {
                        module: module.name().to_owned(),
                        outcome: ModuleOutcome::InjectFailed,
                    });
                }
            }
        }

        // Bounded recovery poll, one module at a time.
        for module in &injected {
            let outcome = self.poll_recovery(module.as_ref()).await;
            if let Some(metrics) = &self.metrics {
                let elapsed = match outcome {
                    ModuleOutcome::Recovered { elapsed } => Some(elapsed),
                    _ => None,
                };
                metrics.observe_module(module.name(), outcome.as_str(), elapsed);
            }
            match outcome {
                ModuleOutcome::Recovered { elapsed } => {
                    self.broken.lock().shift_remove(module.name());
                    self.alerts
                        .notify(
                            &format!("module-recovered:{}", module.name()),
                            &format!(
                                "module {} recovered in {:.1}s",
                                module.name(),
                                elapsed.as_secs_f64()
                            ),
                            AlertLevel::Info,
                        )
                        .await;
                }
                ModuleOutcome::Failed => {
                    self.alerts
                        .notify(
                            &format!("module-failed:{}", module.name()),
                            &format!("module {} failed to recover within the round timeout", module.name()),
                            AlertLevel::Error,
                        )
                        .await;
                }
                _ => {}
            }
            results.push(ModuleRoundResult {
                module: module.name().to_owned(),
                outcome,
            });
        }

        // Fleet verification against the pre-injection baseline.
        let broken_names: Vec<String> = injected
            .iter()
            .map(|module| module.name().to_owned())
            .collect();
        let (blast, verification, recovery, unzoned) = match &steady {
            Some(steady) => {
                let blast = BlastRadius::classify(&broken_names, &self.impact, &self.graph);
                let verification = verify_fleet(
                    &self.graph,
                    steady,
                    self.runtime.as_ref(),
                    self.probe.as_ref(),
                )
                .await;

                let damaged: Vec<String> = verification
                    .damaged()
                    .into_iter()
                    .map(ToOwned::to_owned)
                    .collect();
                let unzoned = blast.unzoned(damaged.iter().map(String::as_str));
                if !unzoned.is_empty() {
                    self.alerts
                        .notify(
                            "unzoned-damage",
                            &format!(
                                "damage outside configured blast radius: {}",
                                unzoned.join(", ")
                            ),
                            AlertLevel::Warn,
                        )
                        .await;
                }

                let mut recovery = Vec::new();
                if !damaged.is_empty() {
                    for name in &damaged {
                        self.alerts
                            .notify(
                                &format!("fleet-damage:{name}"),
                                &format!("container {name} damaged after round {index}"),
                                AlertLevel::Warn,
                            )
                            .await;
                    }
                    if let Some(metrics) = &self.metrics {
                        for (name, status) in &verification.statuses {
                            if let havoc_fleet::ContainerStatus::Damaged(reason) = status {
                                metrics.record_damage(name, reason.as_str());
                            }
                        }
                    }
                    let healer = FleetHealer::new(self.options.poll_interval);
                    recovery = healer
                        .heal(
                            &damaged,
                            &self.graph,
                            self.runtime.as_ref(),
                            self.probe.as_ref(),
                            self.options.strategy,
                        )
                        .await;
                    if let Some(metrics) = &self.metrics {
                        for outcome in &recovery {
                            let label = match outcome.status {
                                RecoveryStatus::Restarted { .. } => "restarted",
                                RecoveryStatus::Failed => "failed",
                            };
                            metrics.record_restart(&outcome.container, label);
                        }
                    }
                }
                (Some(blast), Some(verification), recovery, unzoned)
            }
            None => {
                debug!(round = index, "fleet check disabled");
                (None, None, Vec::new(), Vec::new())
            }
        };

        let report = RoundReport {
            index,
            steady: steady.as_ref().map(|s| SteadyCounts {
                tracked: s.records.len(),
                running: s.running_count(),
                healthy: s.healthy_count(),
            }),
            modules: results,
            blast,
            verification,
            recovery,
            unzoned_damage: unzoned,
        };
        info!(
            round = index,
            passed = report.passed(),
            failures = report.module_failures(),
            "round complete"
        );
        report
    }

    /// Poll a broken module at a fixed interval until healthy or the round
    /// timeout expires. With self-heal enabled each iteration invokes
    /// heal() before checking.
    async fn poll_recovery(&self, module: &dyn FaultModule) -> ModuleOutcome {
        let started = Instant::now();
        let deadline = started + self.options.round_timeout;
        loop {
            if self.options.self_heal {
                if let Err(err) = module.heal().await {
                    debug!(module = module.name(), error = %err, "heal attempt failed");
                }
            }
            if module.check().await.is_healthy() {
                let elapsed = started.elapsed();
                info!(
                    module = module.name(),
                    elapsed_secs = elapsed.as_secs_f64(),
                    "module recovered"
                );
                return ModuleOutcome::Recovered { elapsed };
            }
            if Instant::now() >= deadline {
                warn!(module = module.name(), "round timeout; module still broken");
                return ModuleOutcome::Failed;
            }
            sleep(self.options.poll_interval).await;
        }
    }

    /// Best-effort restore of everything still broken; invoked on
    /// interruption and before store teardown at normal exit. Returns
    /// (restored, failed) counts.
    pub async fn emergency_restore(&self) -> (usize, usize) {
        let names = self.still_broken();
        if names.is_empty() {
            return (0, 0);
        }
        warn!(count = names.len(), "restoring still-broken modules");
        let mut restored = 0;
        let mut failed = 0;
        for name in names {
            let module = match self.registry.resolve(&name) {
                Ok(module) => module,
                Err(err) => {
                    warn!(module = %name, error = %err, "cannot resolve module for restore");
                    failed += 1;
                    continue;
                }
            };
            match module.restore().await {
                Ok(()) => {
                    info!(module = %name, "module restored");
                    self.broken.lock().shift_remove(&name);
                    restored += 1;
                }
                Err(err) => {
                    warn!(module = %name, error = %err, "restore failed");
                    failed += 1;
                }
            }
        }
        (restored, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use havoc_alert::LogSink;
    use havoc_testkit::{call_log, FakeProbe, FakeRuntime, ScriptedModule};

    fn options(rounds: u32) -> CampaignOptions {
        CampaignOptions {
            rounds,
            module_filter: None,
            self_heal: false,
            dry_run: false,
            fleet_check: false,
            round_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            strategy: FleetStrategy::Restart,
        }
    }

    fn campaign(
        dir: &tempfile::TempDir,
        registry: ModuleRegistry,
        options: CampaignOptions,
    ) -> Campaign {
        let store = RunStore::open(dir.path()).unwrap();
        let alerts = CooldownGate::new(store.clone(), Box::new(LogSink), Duration::ZERO);
        Campaign::new(
            registry,
            FleetGraph::default(),
            store,
            alerts,
            Arc::new(FakeRuntime::new()),
            Arc::new(FakeProbe::healthy()),
            IndexMap::new(),
            options,
            None,
        )
        .unwrap()
    }

    #[test]
    fn unknown_module_in_filter_is_fatal_before_any_injection() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let mut registry = ModuleRegistry::new();
        registry
            .register(Arc::new(ScriptedModule::new("mod-a", log.clone())))
            .unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let alerts = CooldownGate::new(store.clone(), Box::new(LogSink), Duration::ZERO);
        let mut opts = options(1);
        opts.module_filter = Some(vec!["mod-a".to_owned(), "mod-zzz".to_owned()]);

        let result = Campaign::new(
            registry,
            FleetGraph::default(),
            store,
            alerts,
            Arc::new(FakeRuntime::new()),
            Arc::new(FakeProbe::healthy()),
            IndexMap::new(),
            opts,
            None,
        );
        assert!(result.is_err());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn self_blinding_module_breaks_last() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let mut registry = ModuleRegistry::new();
        registry
            .register(Arc::new(
                ScriptedModule::new("blinder", log.clone())
                    .self_blinding()
                    .recovers_after(0),
            ))
            .unwrap();
        registry
            .register(Arc::new(
                ScriptedModule::new("mod-a", log.clone()).recovers_after(0),
            ))
            .unwrap();
        registry
            .register(Arc::new(
                ScriptedModule::new("mod-b", log.clone()).recovers_after(0),
            ))
            .unwrap();

        let mut campaign = campaign(&dir, registry, options(1));
        let report = campaign.run().await;
        assert!(report.succeeded());

        let log = log.lock();
        let injections: Vec<&String> =
            log.iter().filter(|entry| entry.starts_with("inject:")).collect();
        assert_eq!(injections.len(), 3);
        assert_eq!(
            injections.last().unwrap().as_str(),
            "inject:blinder",
            "self-blinding module must inject last"
        );
    }

    #[tokio::test]
    async fn failed_module_stays_in_broken_set_until_restore() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let mut registry = ModuleRegistry::new();
        registry
            .register(Arc::new(ScriptedModule::new("stuck", log.clone())))
            .unwrap();

        let mut campaign = campaign(&dir, registry, options(1));
        let report = campaign.run().await;
        assert!(!report.succeeded());
        assert_eq!(campaign.still_broken(), vec!["stuck".to_owned()]);

        let (restored, failed) = campaign.emergency_restore().await;
        assert_eq!((restored, failed), (1, 0));
        assert!(campaign.still_broken().is_empty());
        assert!(log.lock().iter().any(|entry| entry == "restore:stuck"));
    }

    #[tokio::test]
    async fn baseline_skips_do_not_reach_injection() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let mut registry = ModuleRegistry::new();
        registry
            .register(Arc::new(ScriptedModule::new("reader", log.clone()).read_only()))
            .unwrap();
        registry
            .register(Arc::new(
                ScriptedModule::new("sick", log.clone()).broken_at_baseline(),
            ))
            .unwrap();

        let mut campaign = campaign(&dir, registry, options(1));
        let report = campaign.run().await;
        assert!(report.succeeded());

        let outcomes: Vec<_> = report.rounds[0]
            .modules
            .iter()
            .map(|r| (r.module.as_str(), r.outcome))
            .collect();
        assert!(outcomes.contains(&("reader", ModuleOutcome::SkippedReadOnly)));
        assert!(outcomes.contains(&("sick", ModuleOutcome::SkippedUnhealthy)));
        assert!(!log.lock().iter().any(|entry| entry.starts_with("inject:")));
    }

    #[tokio::test]
    async fn dry_run_leaves_module_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let module = Arc::new(ScriptedModule::new("mod-a", log.clone()));
        let mut registry = ModuleRegistry::new();
        registry.register(module.clone()).unwrap();

        let mut opts = options(1);
        opts.dry_run = true;
        let mut campaign = campaign(&dir, registry, opts);
        let report = campaign.run().await;
        assert!(report.succeeded());
        assert!(module.is_currently_healthy());
        assert!(campaign.still_broken().is_empty());
    }

    #[tokio::test]
    async fn self_heal_invokes_heal_during_polling() {
        let dir = tempfile::tempdir().unwrap();
        let log = call_log();
        let mut registry = ModuleRegistry::new();
        // Never recovers on its own; only heal() clears it.
        registry
            .register(Arc::new(ScriptedModule::new("needy", log.clone())))
            .unwrap();

        let mut opts = options(1);
        opts.self_heal = true;
        let mut campaign = campaign(&dir, registry, opts);
        let report = campaign.run().await;
        assert!(report.succeeded());
        assert!(log.lock().iter().any(|entry| entry == "heal:needy"));
    }
}
