//! ---
//! havoc_section: "08-campaign-orchestration"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Campaign orchestration, reporting, and metrics."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::fmt::Write as _;
use std::time::Duration;

use havoc_fleet::{BlastRadius, FleetVerification, RecoveryOutcome, RecoveryStatus};
use indexmap::{IndexMap, IndexSet};

/// How one module fared in one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModuleOutcome {
    Recovered { elapsed: Duration },
    /// Still broken when the round timeout expired.
    Failed,
    /// Break is a known read-only stub; skipped at baseline.
    SkippedReadOnly,
    /// Check already reported unhealthy before injection.
    SkippedUnhealthy,
    /// Injection failed; excluded from the round's poll, not a round error.
    InjectFailed,
}

impl ModuleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleOutcome::Recovered { .. } => "recovered",
            ModuleOutcome::Failed => "failed",
            ModuleOutcome::SkippedReadOnly => "skipped-read-only",
            ModuleOutcome::SkippedUnhealthy => "skipped-unhealthy",
            ModuleOutcome::InjectFailed => "inject-failed",
        }
    }

    pub fn is_round_failure(self) -> bool {
        matches!(self, ModuleOutcome::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct ModuleRoundResult {
    pub module: String,
    pub outcome: ModuleOutcome,
}

/// Baseline counts carried into the round report.
#[derive(Debug, Clone, Copy)]
pub struct SteadyCounts {
    pub tracked: usize,
    pub running: usize,
    pub healthy: usize,
}

/// Everything observed in one break→poll→verify→heal cycle.
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub index: u32,
    pub steady: Option<SteadyCounts>,
    pub modules: Vec<ModuleRoundResult>,
    pub blast: Option<BlastRadius>,
    pub verification: Option<FleetVerification>,
    pub recovery: Vec<RecoveryOutcome>,
    /// Damaged containers outside every zone: incomplete impact config.
    pub unzoned_damage: Vec<String>,
}

impl RoundReport {
    pub fn module_failures(&self) -> usize {
        self.modules
            .iter()
            .filter(|result| result.outcome.is_round_failure())
            .count()
    }

    /// Containers damaged in verification and not brought back by healing.
    pub fn unresolved_damage(&self) -> Vec<&str> {
        let Some(verification) = &self.verification else {
            return Vec::new();
        };
        let restarted: IndexSet<&str> = self
            .recovery
            .iter()
            .filter(|outcome| matches!(outcome.status, RecoveryStatus::Restarted { .. }))
            .map(|outcome| outcome.container.as_str())
            .collect();
        verification
            .damaged()
            .into_iter()
            .filter(|name| !restarted.contains(name))
            .collect()
    }

    pub fn passed(&self) -> bool {
        self.module_failures() == 0 && self.unresolved_damage().is_empty()
    }
}

/// Cross-round aggregate for one module.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleAggregate {
    pub passes: u32,
    pub fails: u32,
    total_recovery: Duration,
}

impl ModuleAggregate {
    pub fn mean_recovery(&self) -> Option<Duration> {
        if self.passes == 0 {
            return None;
        }
        Some(self.total_recovery / self.passes)
    }
}

/// Campaign-wide rollup across rounds.
#[derive(Debug, Clone, Default)]
pub struct CampaignReport {
    pub rounds: Vec<RoundReport>,
    pub aggregates: IndexMap<String, ModuleAggregate>,
}

impl CampaignReport {
    pub fn absorb_round(&mut self, round: RoundReport) {
        for result in &round.modules {
            let aggregate = self.aggregates.entry(result.module.clone()).or_default();
            match result.outcome {
                ModuleOutcome::Recovered { elapsed } => {
                    aggregate.passes += 1;
                    aggregate.total_recovery += elapsed;
                }
                ModuleOutcome::Failed => aggregate.fails += 1,
                _ => {}
            }
        }
        self.rounds.push(round);
    }

    /// Exit contract: failure if any module round failed outright or fleet
    /// damage stayed unresolved after healing.
    pub fn succeeded(&self) -> bool {
        self.rounds.iter().all(RoundReport::passed)
    }

    /// Zone-structured per-round text plus cross-round aggregates.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let status = if self.succeeded() { "PASS" } else { "FAIL" };
        let _ = writeln!(out, "campaign: {} round(s), status {status}", self.rounds.len());

        for round in &self.rounds {
            let round_status = if round.passed() { "PASS" } else { "FAIL" };
            let _ = writeln!(out, "round {}: {round_status}", round.index);
            if let Some(counts) = &round.steady {
                let _ = writeln!(
                    out,
                    "  baseline: {} tracked, {} running, {} healthy",
                    counts.tracked, counts.running, counts.healthy
                );
            }
            for result in &round.modules {
                match result.outcome {
                    ModuleOutcome::Recovered { elapsed } => {
                        let _ = writeln!(
                            out,
                            "  module {:<16} recovered in {:.1}s",
                            result.module,
                            elapsed.as_secs_f64()
                        );
                    }
                    outcome => {
                        let _ = writeln!(out, "  module {:<16} {}", result.module, outcome.as_str());
                    }
                }
            }
            if let Some(blast) = &round.blast {
                let _ = writeln!(out, "  blast radius:");
                for (zone, members) in [
                    ("zone0", &blast.zone0),
                    ("zone1", &blast.zone1),
                    ("zone2", &blast.zone2),
                ] {
                    let rendered = if members.is_empty() {
                        "-".to_owned()
                    } else {
                        members.iter().cloned().collect::<Vec<_>>().join(", ")
                    };
                    let _ = writeln!(out, "    {zone}: {rendered}");
                }
            }
            if let Some(verification) = &round.verification {
                let damaged = verification.damaged();
                if damaged.is_empty() {
                    let _ = writeln!(
                        out,
                        "  fleet: no collateral damage ({} skipped)",
                        verification.skipped()
                    );
                } else {
                    let _ = writeln!(out, "  fleet: damaged {}", damaged.join(", "));
                }
            }
            if !round.unzoned_damage.is_empty() {
                let _ = writeln!(
                    out,
                    "  warning: damage outside configured blast radius: {}",
                    round.unzoned_damage.join(", ")
                );
            }
            for outcome in &round.recovery {
                match outcome.status {
                    RecoveryStatus::Restarted { elapsed } => {
                        let _ = writeln!(
                            out,
                            "  recovery {:<14} restarted in {:.1}s",
                            outcome.container,
                            elapsed.as_secs_f64()
                        );
                    }
                    RecoveryStatus::Failed => {
                        let _ = writeln!(out, "  recovery {:<14} FAILED", outcome.container);
                    }
                }
            }
        }

        if !self.aggregates.is_empty() {
            let _ = writeln!(out, "per-module totals:");
            for (module, aggregate) in &self.aggregates {
                match aggregate.mean_recovery() {
                    Some(mean) => {
                        let _ = writeln!(
                            out,
                            "  {:<16} {} pass(es), {} fail(s), mean recovery {:.1}s",
                            module,
                            aggregate.passes,
                            aggregate.fails,
                            mean.as_secs_f64()
                        );
                    }
                    None => {
                        let _ = writeln!(
                            out,
                            "  {:<16} {} pass(es), {} fail(s)",
                            module, aggregate.passes, aggregate.fails
                        );
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(index: u32, modules: Vec<ModuleRoundResult>) -> RoundReport {
        RoundReport {
            index,
            steady: None,
            modules,
            blast: None,
            verification: None,
            recovery: Vec::new(),
            unzoned_damage: Vec::new(),
        }
    }

    fn result(module: &str, outcome: ModuleOutcome) -> ModuleRoundResult {
        ModuleRoundResult {
            module: module.to_owned(),
            outcome,
        }
    }

    #[test]
    fn aggregates_mean_recovery_per_module() {
        let mut report = CampaignReport::default();
        report.absorb_round(round(
            1,
            vec![result(
                "db-pause",
                ModuleOutcome::Recovered {
                    elapsed: Duration::from_secs(2),
                },
            )],
        ));
        report.absorb_round(round(
            2,
            vec![result(
                "db-pause",
                ModuleOutcome::Recovered {
                    elapsed: Duration::from_secs(4),
                },
            )],
        ));

        let aggregate = &report.aggregates["db-pause"];
        assert_eq!(aggregate.passes, 2);
        assert_eq!(aggregate.mean_recovery(), Some(Duration::from_secs(3)));
        assert!(report.succeeded());
    }

    #[test]
    fn failed_module_fails_the_campaign() {
        let mut report = CampaignReport::default();
        report.absorb_round(round(1, vec![result("disk-fill", ModuleOutcome::Failed)]));
        assert!(!report.succeeded());
        assert_eq!(report.aggregates["disk-fill"].fails, 1);
        assert_eq!(report.aggregates["disk-fill"].mean_recovery(), None);
    }

    #[test]
    fn skips_and_inject_failures_do_not_fail_the_round() {
        let mut report = CampaignReport::default();
        report.absorb_round(round(
            1,
            vec![
                result("storage-health", ModuleOutcome::SkippedReadOnly),
                result("tunnel-stop", ModuleOutcome::SkippedUnhealthy),
                result("dns-poison", ModuleOutcome::InjectFailed),
            ],
        ));
        assert!(report.succeeded());
    }

    #[test]
    fn render_mentions_status_and_modules() {
        let mut report = CampaignReport::default();
        report.absorb_round(round(
            1,
            vec![result(
                "db-pause",
                ModuleOutcome::Recovered {
                    elapsed: Duration::from_secs(3),
                },
            )],
        ));
        let rendered = report.render();
        assert!(rendered.contains("status PASS"));
        assert!(rendered.contains("db-pause"));
        assert!(rendered.contains("recovered in 3.0s"));
    }
}
