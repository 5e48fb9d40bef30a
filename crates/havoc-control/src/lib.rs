//! ---
//! havoc_section: "05-control-plane"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Container control-plane client and health probing."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use anyhow::Result;
use async_trait::async_trait;

pub mod docker;
pub mod probe;

pub use docker::DockerCli;
pub use probe::{HttpProbe, HEALTH_PROBE_TIMEOUT};

/// Control-plane operations the drill needs from a container runtime.
///
/// Implementations convert their own failures into errors; callers treat a
/// probe error as a status ("cannot observe"), never as a reason to abort a
/// round. When the underlying tool is absent entirely, probes must degrade
/// to "pass" so a drill on a machine without the runtime stays a no-op
/// rather than a wall of false damage.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + std::fmt::Debug {
    /// Whether the underlying tool was found at startup.
    fn available(&self) -> bool;

    /// Names of currently running containers, in enumeration order.
    async fn list_running(&self) -> Result<Vec<String>>;

    async fn is_running(&self, name: &str) -> Result<bool>;

    async fn is_paused(&self, name: &str) -> Result<bool>;

    async fn restart(&self, name: &str) -> Result<()>;

    async fn pause(&self, name: &str) -> Result<()>;

    async fn unpause(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn start(&self, name: &str) -> Result<()>;
}

/// Health-endpoint probing contract. Any non-success outcome is
/// "unhealthy", never an error; an unhealthy baseline is data, not a fault.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn healthy(&self, url: &url::Url) -> bool;
}
