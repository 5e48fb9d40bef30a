//! ---
//! havoc_section: "07-fleet-verification"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fleet topology, steady-state capture, and verification."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use havoc_control::{ContainerRuntime, HealthProbe};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::graph::FleetGraph;
use crate::steady::SteadyState;

/// Why a container counts as damaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageReason {
    NotRunning,
    HealthCheckFailure,
}

impl DamageReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DamageReason::NotRunning => "not-running",
            DamageReason::HealthCheckFailure => "health-check-failure",
        }
    }
}

impl std::fmt::Display for DamageReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-round status of one container relative to its baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Healthy,
    Damaged(DamageReason),
    /// Was not running at baseline; never newly flagged.
    Skip,
}

/// Current state of every tracked container diffed against the baseline.
#[derive(Debug, Clone)]
pub struct FleetVerification {
    pub statuses: IndexMap<String, ContainerStatus>,
}

impl FleetVerification {
    pub fn damaged(&self) -> Vec<&str> {
        self.statuses
            .iter()
            .filter(|(_, status)| matches!(status, ContainerStatus::Damaged(_)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_healthy(&self) -> bool {
        self.statuses
            .values()
            .all(|status| !matches!(status, ContainerStatus::Damaged(_)))
    }

    pub fn skipped(&self) -> usize {
        self.statuses
            .values()
            .filter(|status| matches!(status, ContainerStatus::Skip))
            .count()
    }
}

/// Re-probe every tracked container and diff against the steady-state
/// baseline. Containers down at baseline are always `Skip`: the drill
/// cannot have damaged what was already dead.
pub async fn verify_fleet(
    graph: &FleetGraph,
    steady: &SteadyState,
    runtime: &dyn ContainerRuntime,
    probe: &dyn HealthProbe,
) -> FleetVerification {
    let mut statuses = IndexMap::new();
    for container in graph.iter() {
        let baseline = steady.get(&container.name);
        let was_running = baseline.map(|record| record.running).unwrap_or(false);
        if !was_running {
            statuses.insert(container.name.clone(), ContainerStatus::Skip);
            continue;
        }

        let running = match runtime.is_running(&container.name).await {
            Ok(running) => running,
            Err(err) => {
                warn!(container = %container.name, error = %err, "liveness unobservable during verification");
                false
            }
        };
        if !running {
            warn!(container = %container.name, "container down after round");
            statuses.insert(
                container.name.clone(),
                ContainerStatus::Damaged(DamageReason::NotRunning),
            );
            continue;
        }

        // Health is compared only when a baseline reading exists and was
        // healthy; a container already unhealthy before injection is not
        // new damage.
        let was_healthy = baseline.and_then(|record| record.healthy) == Some(true);
        if let (Some(url), true) = (&container.health_url, was_healthy) {
            if !probe.healthy(url).await {
                warn!(container = %container.name, "health check failing after round");
                statuses.insert(
                    container.name.clone(),
                    ContainerStatus::Damaged(DamageReason::HealthCheckFailure),
                );
                continue;
            }
        }
        statuses.insert(container.name.clone(), ContainerStatus::Healthy);
    }

    let verification = FleetVerification { statuses };
    info!(
        damaged = verification.damaged().len(),
        skipped = verification.skipped(),
        "fleet verification complete"
    );
    verification
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ContainerOrigin, TrackedContainer};
    use havoc_testkit::{FakeProbe, FakeRuntime};
    use std::time::Duration;
    use url::Url;

    fn graph() -> FleetGraph {
        FleetGraph::from_containers(vec![
            TrackedContainer {
                name: "db".to_owned(),
                health_url: None,
                depends_on: Vec::new(),
                timeout: Duration::from_secs(10),
                origin: ContainerOrigin::Configured,
            },
            TrackedContainer {
                name: "app".to_owned(),
                health_url: Some(Url::parse("http://127.0.0.1:8080/health").unwrap()),
                depends_on: vec!["db".to_owned()],
                timeout: Duration::from_secs(10),
                origin: ContainerOrigin::Configured,
            },
            TrackedContainer {
                name: "serviceX".to_owned(),
                health_url: None,
                depends_on: Vec::new(),
                timeout: Duration::from_secs(10),
                origin: ContainerOrigin::Discovered,
            },
        ])
    }

    async fn baseline(runtime: &FakeRuntime, probe: &FakeProbe) -> SteadyState {
        SteadyState::capture(&graph(), runtime, probe).await
    }

    #[tokio::test]
    async fn down_at_baseline_stays_skip_even_when_still_down() {
        let runtime = FakeRuntime::new();
        runtime.set_running("db", true);
        runtime.set_running("app", true);
        runtime.set_running("serviceX", false);
        let probe = FakeProbe::healthy();
        let steady = baseline(&runtime, &probe).await;

        let verification = verify_fleet(&graph(), &steady, &runtime, &probe).await;
        assert_eq!(
            verification.statuses.get("serviceX"),
            Some(&ContainerStatus::Skip)
        );
        assert!(verification.is_healthy());
    }

    #[tokio::test]
    async fn newly_stopped_container_is_damaged() {
        let runtime = FakeRuntime::new();
        runtime.set_running("db", true);
        runtime.set_running("app", true);
        let probe = FakeProbe::healthy();
        let steady = baseline(&runtime, &probe).await;

        runtime.set_running("db", false);
        let verification = verify_fleet(&graph(), &steady, &runtime, &probe).await;
        assert_eq!(
            verification.statuses.get("db"),
            Some(&ContainerStatus::Damaged(DamageReason::NotRunning))
        );
        assert_eq!(verification.damaged(), vec!["db"]);
    }

    #[tokio::test]
    async fn health_regression_is_damage() {
        let runtime = FakeRuntime::new();
        runtime.set_running("db", true);
        runtime.set_running("app", true);
        let probe = FakeProbe::healthy();
        let steady = baseline(&runtime, &probe).await;

        probe.set("http://127.0.0.1:8080/health", false);
        let verification = verify_fleet(&graph(), &steady, &runtime, &probe).await;
        assert_eq!(
            verification.statuses.get("app"),
            Some(&ContainerStatus::Damaged(DamageReason::HealthCheckFailure))
        );
    }

    #[tokio::test]
    async fn unhealthy_baseline_is_not_new_damage() {
        let runtime = FakeRuntime::new();
        runtime.set_running("db", true);
        runtime.set_running("app", true);
        let probe = FakeProbe::healthy();
        probe.set("http://127.0.0.1:8080/health", false);
        let steady = baseline(&runtime, &probe).await;

        // Still unhealthy after the round: baseline already said so.
        let verification = verify_fleet(&graph(), &steady, &runtime, &probe).await;
        assert_eq!(
            verification.statuses.get("app"),
            Some(&ContainerStatus::Healthy)
        );
    }
}
