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
use std::time::Duration;

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Metrics published by the campaign orchestrator. The registry is
/// gathered into the final report at exit; drills are too short-lived to
/// scrape.
#[derive(Clone)]
pub struct CampaignMetrics {
    registry: SharedRegistry,
    rounds_total: IntCounter,
    module_outcomes_total: IntCounterVec,
    module_recovery_seconds: HistogramVec,
    fleet_damage_total: IntCounterVec,
    container_restarts_total: IntCounterVec,
}

impl CampaignMetrics {
    /// Register the campaign metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let rounds_total = IntCounter::new(
            "havoc_campaign_rounds_total",
            "Number of drill rounds executed",
        )?;
        registry.register(Box::new(rounds_total.clone()))?;

        let module_outcomes_total = IntCounterVec::new(
            Opts::new(
                "havoc_module_outcomes_total",
                "Per-module round outcomes by label",
            ),
            &["module", "outcome"],
        )?;
        registry.register(Box::new(module_outcomes_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "havoc_module_recovery_seconds",
            "Observed duration between injection and a healthy check",
        )
        .buckets(prometheus::exponential_buckets(0.5, 2.0, 10)?);
        let module_recovery_seconds = HistogramVec::new(histogram_opts, &["module"])?;
        registry.register(Box::new(module_recovery_seconds.clone()))?;

        let fleet_damage_total = IntCounterVec::new(
            Opts::new(
                "havoc_fleet_damage_total",
                "Containers found damaged during fleet verification",
            ),
            &["container", "reason"],
        )?;
        registry.register(Box::new(fleet_damage_total.clone()))?;

        let container_restarts_total = IntCounterVec::new(
            Opts::new(
                "havoc_container_restarts_total",
                "Recovery restart attempts by outcome",
            ),
            &["container", "outcome"],
        )?;
        registry.register(Box::new(container_restarts_total.clone()))?;

        Ok(Self {
            registry,
            rounds_total,
            module_outcomes_total,
            module_recovery_seconds,
            fleet_damage_total,
            container_restarts_total,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_round(&self) {
        self.rounds_total.inc();
    }

    /// Record a module's round outcome, with recovery latency when it
    /// recovered.
    pub fn observe_module(&self, module: &str, outcome: &str, elapsed: Option<Duration>) {
        self.module_outcomes_total
            .with_label_values(&[module, outcome])
            .inc();
        if let Some(elapsed) = elapsed {
            self.module_recovery_seconds
                .with_label_values(&[module])
                .observe(elapsed.as_secs_f64());
        }
    }

    pub fn record_damage(&self, container: &str, reason: &str) {
        self.fleet_damage_total
            .with_label_values(&[container, reason])
            .inc();
    }

    pub fn record_restart(&self, container: &str, outcome: &str) {
        self.container_restarts_total
            .with_label_values(&[container, outcome])
            .inc();
    }
}

impl std::fmt::Debug for CampaignMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignMetrics").finish_non_exhaustive()
    }
}
