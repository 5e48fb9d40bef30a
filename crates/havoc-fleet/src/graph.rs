//! ---
//! havoc_section: "07-fleet-verification"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fleet topology, steady-state capture, and verification."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{Context, Result};
use havoc_config::FleetSettings;
use havoc_control::ContainerRuntime;
use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, info};
use url::Url;

/// Where a tracked container came from. Configured entries are
/// authoritative for topology; discovered entries are liveness-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerOrigin {
    Configured,
    Discovered,
}

/// One container the drill watches.
#[derive(Debug, Clone)]
pub struct TrackedContainer {
    pub name: String,
    pub health_url: Option<Url>,
    pub depends_on: Vec<String>,
    pub timeout: Duration,
    pub origin: ContainerOrigin,
}

/// Tracked containers plus dependency edges, rebuilt once per orchestrator
/// start: configured entries in configuration order, then auto-discovered
/// running containers in enumeration order.
#[derive(Debug, Clone, Default)]
pub struct FleetGraph {
    containers: IndexMap<String, TrackedContainer>,
}

impl FleetGraph {
    pub async fn build(settings: &FleetSettings, runtime: &dyn ContainerRuntime) -> Result<Self> {
        let skip = settings
            .skip_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid fleet.skip_pattern")?;

        let mut containers = IndexMap::new();
        for entry in &settings.containers {
            containers.insert(
                entry.name.clone(),
                TrackedContainer {
                    name: entry.name.clone(),
                    health_url: entry.health_url.clone(),
                    depends_on: entry.depends_on.clone(),
                    timeout: entry.timeout.unwrap_or(settings.default_timeout),
                    origin: ContainerOrigin::Configured,
                },
            );
        }

        let running = runtime
            .list_running()
            .await
            .context("unable to enumerate running containers")?;
        for name in running {
            if containers.contains_key(&name) {
                continue;
            }
            if let Some(skip) = &skip {
                if skip.is_match(&name) {
                    debug!(container = %name, "skipped by discovery pattern");
                    continue;
                }
            }
            containers.insert(
                name.clone(),
                TrackedContainer {
                    name,
                    health_url: None,
                    depends_on: Vec::new(),
                    timeout: settings.default_timeout,
                    origin: ContainerOrigin::Discovered,
                },
            );
        }

        info!(
            tracked = containers.len(),
            configured = containers
                .values()
                .filter(|c| c.origin == ContainerOrigin::Configured)
                .count(),
            "fleet graph built"
        );
        Ok(Self { containers })
    }

    pub fn get(&self, name: &str) -> Option<&TrackedContainer> {
        self.containers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.containers.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedContainer> {
        self.containers.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.containers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Build directly from tracked containers (tests, prebuilt topologies).
    pub fn from_containers(containers: Vec<TrackedContainer>) -> Self {
        Self {
            containers: containers
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
        }
    }
}
