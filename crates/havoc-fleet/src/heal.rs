//! ---
//! havoc_section: "07-fleet-verification"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fleet topology, steady-state capture, and verification."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use havoc_config::FleetStrategy;
use havoc_control::{ContainerRuntime, HealthProbe};
use indexmap::{IndexMap, IndexSet};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::graph::FleetGraph;

/// Result of one container's recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryStatus {
    Restarted { elapsed: Duration },
    Failed,
}

#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub container: String,
    pub status: RecoveryStatus,
}

/// Restarts damaged containers parents-before-children, one at a time.
/// Sequential healing bounds load on a possibly-degraded control plane and
/// guarantees a parent its full timeout before any dependent's attempt.
#[derive(Debug, Clone)]
pub struct FleetHealer {
    poll_interval: Duration,
}

impl FleetHealer {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Kahn's algorithm over the damaged subgraph. Only edges between
    /// damaged containers matter; cyclic or unresolvable members are
    /// appended in discovery order after all acyclic nodes instead of
    /// blocking the heal.
    pub fn topo_order(damaged: &[String], graph: &FleetGraph) -> Vec<String> {
        let damaged_set: IndexSet<&str> = damaged.iter().map(String::as_str).collect();

        let mut indegree: IndexMap<&str, usize> = IndexMap::new();
        let mut dependents: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for &name in &damaged_set {
            let deps = graph
                .get(name)
                .map(|c| {
                    c.depends_on
                        .iter()
                        .filter(|dep| damaged_set.contains(dep.as_str()))
                        .count()
                })
                .unwrap_or(0);
            indegree.insert(name, deps);
            if let Some(container) = graph.get(name) {
                for dep in &container.depends_on {
                    if damaged_set.contains(dep.as_str()) {
                        dependents.entry(dep.as_str()).or_default().push(name);
                    }
                }
            }
        }

        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut ordered = Vec::with_capacity(damaged_set.len());
        let mut placed: IndexSet<&str> = IndexSet::new();
        while let Some(name) = queue.pop_front() {
            ordered.push(name.to_owned());
            placed.insert(name);
            for &dependent in dependents.get(name).into_iter().flatten() {
                let degree = indegree.get_mut(dependent).expect("dependent tracked");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        // Cycle fallback: whatever Kahn could not place, in discovery order.
        for &name in &damaged_set {
            if !placed.contains(name) {
                warn!(container = %name, "dependency cycle; appending in discovery order");
                ordered.push(name.to_owned());
            }
        }
        ordered
    }

    /// Heal the damaged set under the given strategy. Under `report`
    /// nothing is touched and every container stays broken.
    pub async fn heal(
        &self,
        damaged: &[String],
        graph: &FleetGraph,
        runtime: &dyn ContainerRuntime,
        probe: &dyn HealthProbe,
        strategy: FleetStrategy,
    ) -> Vec<RecoveryOutcome> {
        if damaged.is_empty() {
            return Vec::new();
        }
        if strategy == FleetStrategy::Report {
            for name in damaged {
                info!(container = %name, "damaged (report-only strategy)");
            }
            return damaged
                .iter()
                .map(|name| RecoveryOutcome {
                    container: name.clone(),
                    status: RecoveryStatus::Failed,
                })
                .collect();
        }

        let order = Self::topo_order(damaged, graph);
        let mut outcomes = Vec::with_capacity(order.len());
        for name in order {
            let status = self.restart_and_wait(&name, graph, runtime, probe).await;
            outcomes.push(RecoveryOutcome {
                container: name,
                status,
            });
        }
        outcomes
    }

    async fn restart_and_wait(
        &self,
        name: &str,
        graph: &FleetGraph,
        runtime: &dyn ContainerRuntime,
        probe: &dyn HealthProbe,
    ) -> RecoveryStatus {
        let timeout = graph
            .get(name)
            .map(|c| c.timeout)
            .unwrap_or(Duration::from_secs(60));
        let started = Instant::now();
        if let Err(err) = runtime.restart(name).await {
            warn!(container = %name, error = %err, "restart failed");
            return RecoveryStatus::Failed;
        }

        let deadline = started + timeout;
        loop {
            let running = runtime.is_running(name).await.unwrap_or(false);
            if running {
                let healthy = match graph.get(name).and_then(|c| c.health_url.as_ref()) {
                    Some(url) => probe.healthy(url).await,
                    None => true,
                };
                if healthy {
                    let elapsed = started.elapsed();
                    info!(container = %name, elapsed_secs = elapsed.as_secs_f64(), "container recovered");
                    return RecoveryStatus::Restarted { elapsed };
                }
            }
            if Instant::now() >= deadline {
                warn!(container = %name, timeout_secs = timeout.as_secs_f64(), "recovery timed out");
                return RecoveryStatus::Failed;
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ContainerOrigin, TrackedContainer};
    use havoc_testkit::{FakeProbe, FakeRuntime};

    fn container(name: &str, deps: &[&str], timeout: Duration) -> TrackedContainer {
        TrackedContainer {
            name: name.to_owned(),
            health_url: None,
            depends_on: deps.iter().map(|d| (*d).to_owned()).collect(),
            timeout,
            origin: ContainerOrigin::Configured,
        }
    }

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn parents_order_before_children() {
        let graph = FleetGraph::from_containers(vec![
            container("web", &["api"], Duration::from_secs(10)),
            container("api", &["db"], Duration::from_secs(10)),
            container("db", &[], Duration::from_secs(10)),
        ]);
        let order = FleetHealer::topo_order(&names(&["web", "api", "db"]), &graph);
        assert_eq!(order, names(&["db", "api", "web"]));
    }

    #[test]
    fn undamaged_dependencies_do_not_block() {
        let graph = FleetGraph::from_containers(vec![
            container("db", &[], Duration::from_secs(10)),
            container("api", &["db"], Duration::from_secs(10)),
        ]);
        // db is healthy; api alone heals immediately.
        let order = FleetHealer::topo_order(&names(&["api"]), &graph);
        assert_eq!(order, names(&["api"]));
    }

    #[test]
    fn cyclic_members_append_in_discovery_order() {
        let graph = FleetGraph::from_containers(vec![
            container("a", &["b"], Duration::from_secs(10)),
            container("b", &["a"], Duration::from_secs(10)),
            container("solo", &[], Duration::from_secs(10)),
        ]);
        let order = FleetHealer::topo_order(&names(&["a", "b", "solo"]), &graph);
        // solo is acyclic and goes first; the cycle keeps discovery order.
        assert_eq!(order, names(&["solo", "a", "b"]));
    }

    #[test]
    fn unordered_siblings_keep_discovery_order() {
        let graph = FleetGraph::from_containers(vec![
            container("db", &[], Duration::from_secs(10)),
            container("cache", &[], Duration::from_secs(10)),
        ]);
        let order = FleetHealer::topo_order(&names(&["cache", "db"]), &graph);
        assert_eq!(order, names(&["cache", "db"]));
    }

    #[tokio::test]
    async fn parent_restart_completes_before_dependent_begins() {
        // db (no deps) and app (depends on db), both damaged. db takes two
        // polls to come back; every one of them must precede app's restart.
        let graph = FleetGraph::from_containers(vec![
            container("db", &[], Duration::from_secs(10)),
            container("app", &["db"], Duration::from_secs(10)),
        ]);
        let runtime = FakeRuntime::new();
        runtime.set_running("db", false);
        runtime.set_running("app", false);
        runtime.delay_restart("db", 2);

        let healer = FleetHealer::new(Duration::from_millis(5));
        let outcomes = healer
            .heal(
                &names(&["app", "db"]),
                &graph,
                &runtime,
                &FakeProbe::healthy(),
                FleetStrategy::Restart,
            )
            .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].container, "db");
        assert!(matches!(
            outcomes[0].status,
            RecoveryStatus::Restarted { .. }
        ));
        assert!(matches!(
            outcomes[1].status,
            RecoveryStatus::Restarted { .. }
        ));

        let db_done = runtime.last_call_index("is_running:db").unwrap();
        let app_started = runtime.call_index("restart:app").unwrap();
        assert!(
            db_done < app_started,
            "db's recovery poll must finish before app's restart"
        );
    }

    #[tokio::test]
    async fn timeout_yields_failed_outcome() {
        let graph = FleetGraph::from_containers(vec![container(
            "db",
            &[],
            Duration::from_millis(25),
        )]);
        let runtime = FakeRuntime::new();
        runtime.set_running("db", false);
        // Far more polls than fit in 25ms at 5ms per poll.
        runtime.delay_restart("db", 1000);

        let healer = FleetHealer::new(Duration::from_millis(5));
        let outcomes = healer
            .heal(
                &names(&["db"]),
                &graph,
                &runtime,
                &FakeProbe::healthy(),
                FleetStrategy::Restart,
            )
            .await;
        assert_eq!(outcomes[0].status, RecoveryStatus::Failed);
    }

    #[tokio::test]
    async fn failed_restart_does_not_abort_later_containers() {
        let graph = FleetGraph::from_containers(vec![
            container("db", &[], Duration::from_secs(1)),
            container("cache", &[], Duration::from_secs(1)),
        ]);
        let runtime = FakeRuntime::new();
        runtime.set_running("db", false);
        runtime.set_running("cache", false);
        runtime.fail_restart("db");

        let healer = FleetHealer::new(Duration::from_millis(5));
        let outcomes = healer
            .heal(
                &names(&["db", "cache"]),
                &graph,
                &runtime,
                &FakeProbe::healthy(),
                FleetStrategy::Restart,
            )
            .await;
        assert_eq!(outcomes[0].status, RecoveryStatus::Failed);
        assert!(matches!(
            outcomes[1].status,
            RecoveryStatus::Restarted { .. }
        ));
    }

    #[tokio::test]
    async fn report_strategy_touches_nothing() {
        let graph = FleetGraph::from_containers(vec![container(
            "db",
            &[],
            Duration::from_secs(1),
        )]);
        let runtime = FakeRuntime::new();
        runtime.set_running("db", false);

        let healer = FleetHealer::new(Duration::from_millis(5));
        let outcomes = healer
            .heal(
                &names(&["db"]),
                &graph,
                &runtime,
                &FakeProbe::healthy(),
                FleetStrategy::Report,
            )
            .await;
        assert_eq!(outcomes[0].status, RecoveryStatus::Failed);
        assert!(runtime.calls().is_empty());
    }
}
