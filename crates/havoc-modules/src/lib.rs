//! ---
//! havoc_section: "06-fault-modules"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Fault module contract, registry, and built-in variants."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
pub mod contract;
pub mod dbpause;
pub mod diskfill;
pub mod dns;
pub mod registry;
pub mod sockperms;
pub mod storage;
pub mod tunnel;

pub use contract::{FaultModule, ModuleHealth};
pub use dbpause::DbPause;
pub use diskfill::DiskFill;
pub use dns::DnsPoison;
pub use registry::{builtin_registry, ModuleRegistry};
pub use sockperms::SockPerms;
pub use storage::StorageHealth;
pub use tunnel::TunnelStop;
