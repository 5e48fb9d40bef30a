//! ---
//! havoc_section: "07-fleet-verification"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fleet topology, steady-state capture, and verification."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use havoc_control::{ContainerRuntime, HealthProbe};
use havoc_store::RunStore;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::graph::FleetGraph;

/// Baseline observation for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteadyRecord {
    pub running: bool,
    /// Present only when the container was running and a health endpoint is
    /// configured. A failed probe is "unhealthy at baseline", not an error.
    pub healthy: Option<bool>,
}

/// Running/healthy state of every tracked container, captured once before
/// a round's injection. Capturing after injection silently corrupts the
/// baseline; sequencing is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteadyState {
    pub captured_at: DateTime<Utc>,
    pub records: IndexMap<String, SteadyRecord>,
}

impl SteadyState {
    pub async fn capture(
        graph: &FleetGraph,
        runtime: &dyn ContainerRuntime,
        probe: &dyn HealthProbe,
    ) -> Self {
        let mut records = IndexMap::new();
        for container in graph.iter() {
            let running = match runtime.is_running(&container.name).await {
                Ok(running) => running,
                Err(err) => {
                    warn!(container = %container.name, error = %err, "liveness unobservable at baseline");
                    false
                }
            };
            let healthy = match (&container.health_url, running) {
                (Some(url), true) => Some(probe.healthy(url).await),
                _ => None,
            };
            records.insert(container.name.clone(), SteadyRecord { running, healthy });
        }
        let state = Self {
            captured_at: Utc::now(),
            records,
        };
        info!(
            tracked = state.records.len(),
            running = state.running_count(),
            healthy = state.healthy_count(),
            "steady state captured"
        );
        state
    }

    pub fn get(&self, name: &str) -> Option<&SteadyRecord> {
        self.records.get(name)
    }

    pub fn running_count(&self) -> usize {
        self.records.values().filter(|r| r.running).count()
    }

    pub fn healthy_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.healthy == Some(true))
            .count()
    }

    /// Persist the baseline for post-drill inspection.
    pub fn persist(&self, store: &RunStore) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to encode steady state")?;
        store
            .put_document("steady-state.json", &json)
            .context("failed to persist steady state")?;
        Ok(())
    }
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
        ])
    }

    #[tokio::test]
    async fn captures_running_and_health() {
        let runtime = FakeRuntime::new();
        runtime.set_running("db", true);
        runtime.set_running("app", true);
        let probe = FakeProbe::healthy();

        let steady = SteadyState::capture(&graph(), &runtime, &probe).await;
        assert_eq!(steady.running_count(), 2);
        assert_eq!(steady.healthy_count(), 1);
        // No health endpoint configured: liveness only.
        assert_eq!(steady.get("db").unwrap().healthy, None);
        assert_eq!(steady.get("app").unwrap().healthy, Some(true));
    }

    #[tokio::test]
    async fn down_container_gets_no_health_probe() {
        let runtime = FakeRuntime::new();
        runtime.set_running("db", true);
        runtime.set_running("app", false);
        let probe = FakeProbe::healthy();

        let steady = SteadyState::capture(&graph(), &runtime, &probe).await;
        let app = steady.get("app").unwrap();
        assert!(!app.running);
        assert_eq!(app.healthy, None);
    }

    #[tokio::test]
    async fn failed_probe_is_unhealthy_baseline_not_error() {
        let runtime = FakeRuntime::new();
        runtime.set_running("db", true);
        runtime.set_running("app", true);
        let probe = FakeProbe::unhealthy();

        let steady = SteadyState::capture(&graph(), &runtime, &probe).await;
        assert_eq!(steady.get("app").unwrap().healthy, Some(false));
        assert_eq!(steady.healthy_count(), 0);
    }

    #[tokio::test]
    async fn persists_baseline_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let runtime = FakeRuntime::new();
        runtime.set_running("db", true);
        let steady = SteadyState::capture(&graph(), &runtime, &FakeProbe::healthy()).await;
        steady.persist(&store).unwrap();
        let doc = store.root().join("documents").join("steady-state.json");
        let raw = std::fs::read_to_string(doc).unwrap();
        let parsed: SteadyState = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.records.len(), 2);
    }
}
