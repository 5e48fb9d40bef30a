//! ---
//! havoc_section: "07-fleet-verification"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fleet topology, steady-state capture, and verification."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::graph::FleetGraph;

/// Zone a container lands in for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// Direct target of a broken module's impact mapping.
    Zone0,
    /// Depends on a zone0 member.
    Zone1,
    /// Depends on a zone1 member.
    Zone2,
}

impl Zone {
    pub fn as_str(self) -> &'static str {
        match self {
            Zone::Zone0 => "zone0",
            Zone::Zone1 => "zone1",
            Zone::Zone2 => "zone2",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected blast radius of the modules broken in one round.
///
/// Breadth-first over the dependency graph, deliberately capped at depth 2:
/// chains deeper than "dependent of a dependent" collapse into zone2. The
/// zones are pairwise disjoint by construction.
#[derive(Debug, Clone, Default)]
pub struct BlastRadius {
    pub zone0: IndexSet<String>,
    pub zone1: IndexSet<String>,
    pub zone2: IndexSet<String>,
}

impl BlastRadius {
    /// Classify the fleet for the given broken modules. Modules without an
    /// impact mapping are host-level faults and contribute nothing.
    pub fn classify(
        broken_modules: &[String],
        impact: &IndexMap<String, Vec<String>>,
        graph: &FleetGraph,
    ) -> Self {
        let mut zone0 = IndexSet::new();
        for module in broken_modules {
            let Some(targets) = impact.get(module) else {
                debug!(module = %module, "no impact mapping; host-level fault");
                continue;
            };
            for target in targets {
                if graph.contains(target) {
                    zone0.insert(target.clone());
                }
            }
        }

        let mut zone1 = IndexSet::new();
        for container in graph.iter() {
            if zone0.contains(&container.name) {
                continue;
            }
            if container.depends_on.iter().any(|dep| zone0.contains(dep)) {
                zone1.insert(container.name.clone());
            }
        }

        let mut zone2 = IndexSet::new();
        for container in graph.iter() {
            if zone0.contains(&container.name) || zone1.contains(&container.name) {
                continue;
            }
            if container.depends_on.iter().any(|dep| zone1.contains(dep)) {
                zone2.insert(container.name.clone());
            }
        }

        Self {
            zone0,
            zone1,
            zone2,
        }
    }

    pub fn zone_of(&self, name: &str) -> Option<Zone> {
        if self.zone0.contains(name) {
            Some(Zone::Zone0)
        } else if self.zone1.contains(name) {
            Some(Zone::Zone1)
        } else if self.zone2.contains(name) {
            Some(Zone::Zone2)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.zone0.is_empty() && self.zone1.is_empty() && self.zone2.is_empty()
    }

    /// Damaged containers outside every zone: the impact/dependency
    /// configuration did not predict them.
    pub fn unzoned<'a>(&self, damaged: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        damaged
            .into_iter()
            .filter(|name| self.zone_of(name).is_none())
            .map(ToOwned::to_owned)
            .collect()
    }
}
