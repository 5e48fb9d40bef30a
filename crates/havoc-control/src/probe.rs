//! ---
//! havoc_section: "05-control-plane"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Container control-plane client and health probing."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::HealthProbe;

/// Bound on every health probe. A service that cannot answer inside this
/// window counts as unhealthy.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP health prober: a 2xx answer inside the timeout means healthy.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HEALTH_PROBE_TIMEOUT)
            .build()
            .context("failed to build health probe client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn healthy(&self, url: &Url) -> bool {
        match self.client.get(url.clone()).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                debug!(url = %url, status = %response.status(), healthy, "health probe");
                healthy
            }
            Err(err) => {
                debug!(url = %url, error = %err, "health probe failed");
                false
            }
        }
    }
}
