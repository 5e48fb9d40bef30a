//! ---
//! havoc_section: "07-fleet-verification"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fleet topology, steady-state capture, and verification."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
pub mod blast;
pub mod graph;
pub mod heal;
pub mod steady;
pub mod verify;

pub use blast::{BlastRadius, Zone};
pub use graph::{ContainerOrigin, FleetGraph, TrackedContainer};
pub use heal::{FleetHealer, RecoveryOutcome, RecoveryStatus};
pub use steady::{SteadyRecord, SteadyState};
pub use verify::{verify_fleet, ContainerStatus, DamageReason, FleetVerification};
