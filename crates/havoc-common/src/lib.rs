//! ---
//! havoc_section: "01-runtime-foundation"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Shared logging and runtime primitives."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
pub mod logging;

pub use logging::{init_tracing, LogFormat, LoggingConfig};
