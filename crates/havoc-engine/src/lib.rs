//! ---
//! havoc_section: "08-campaign-orchestration"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Campaign orchestration, reporting, and metrics."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
pub mod campaign;
pub mod metrics;
pub mod report;

pub use campaign::{Campaign, CampaignOptions};
pub use metrics::{new_registry, CampaignMetrics, SharedRegistry};
pub use report::{CampaignReport, ModuleAggregate, ModuleOutcome, ModuleRoundResult, RoundReport};
