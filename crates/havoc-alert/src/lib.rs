//! ---
//! havoc_section: "04-alerting"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Alert sinks and cooldown gating."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use havoc_store::RunStore;
use tracing::{error, info, warn};
use url::Url;

/// Severity attached to every alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warn,
    Error,
}

/// Alert transport contract: a single callback invoked with message and
/// level. Delivery failures are the sink's problem to report; they never
/// abort a round.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, message: &str, level: AlertLevel) -> Result<()>;
}

/// Default sink: alerts land in the structured log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send(&self, message: &str, level: AlertLevel) -> Result<()> {
        match level {
            AlertLevel::Info => info!(alert = true, "{message}"),
            AlertLevel::Warn => warn!(alert = true, "{message}"),
            AlertLevel::Error => error!(alert = true, "{message}"),
        }
        Ok(())
    }
}

/// Webhook sink posting a small JSON payload.
#[derive(Debug)]
pub struct WebhookSink {
    client: reqwest::Client,
    endpoint: Url,
}

impl WebhookSink {
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to build webhook client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn send(&self, message: &str, level: AlertLevel) -> Result<()> {
        let payload = serde_json::json!({
            "message": message,
            "level": level.to_string(),
            "at": Utc::now().to_rfc3339(),
        });
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("webhook delivery to {} failed", self.endpoint))?;
        response
            .error_for_status()
            .with_context(|| format!("webhook {} rejected alert", self.endpoint))?;
        Ok(())
    }
}

/// Whether an alert was actually handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDisposition {
    Delivered,
    Suppressed,
}

/// Rate limiter in front of a sink: a same-key alert is suppressed iff
/// `now - last_fire < window`. Timestamps live in the run store so the
/// window covers the whole invocation, not one component's lifetime.
pub struct CooldownGate {
    store: RunStore,
    sink: Box<dyn AlertSink>,
    window: Duration,
}

impl CooldownGate {
    pub fn new(store: RunStore, sink: Box<dyn AlertSink>, window: Duration) -> Self {
        Self {
            store,
            sink,
            window,
        }
    }

    /// Deliver `message` under `key` unless a same-key alert fired inside
    /// the cooldown window. Sink failures are logged and count as fired;
    /// retry storms against a broken transport help nobody.
    pub async fn notify(
        &self,
        key: &str,
        message: &str,
        level: AlertLevel,
    ) -> AlertDisposition {
        let now = Utc::now();
        if !self.should_fire_at(key, now) {
            return AlertDisposition::Suppressed;
        }
        if let Err(err) = self.store.stamp(key, now) {
            warn!(key, error = %err, "failed to stamp alert cooldown");
        }
        if let Err(err) = self.sink.send(message, level).await {
            warn!(key, error = %err, "alert delivery failed");
        }
        AlertDisposition::Delivered
    }

    /// Cooldown decision at an explicit instant.
    pub fn should_fire_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        match self.store.last_fired(key) {
            Ok(Some(last)) => {
                let elapsed = now.signed_duration_since(last);
                match elapsed.to_std() {
                    Ok(elapsed) => elapsed >= self.window,
                    // Clock went backwards relative to the stamp; suppress.
                    Err(_) => false,
                }
            }
            Ok(None) => true,
            Err(err) => {
                warn!(key, error = %err, "unreadable cooldown entry; delivering");
                true
            }
        }
    }
}

impl std::fmt::Debug for CooldownGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CooldownGate")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<(String, AlertLevel)>>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, message: &str, level: AlertLevel) -> Result<()> {
            self.sent.lock().unwrap().push((message.to_owned(), level));
            Ok(())
        }
    }

    fn gate(dir: &tempfile::TempDir, window: Duration) -> (CooldownGate, RunStore) {
        let store = RunStore::open(dir.path()).unwrap();
        let gate = CooldownGate::new(store.clone(), Box::new(RecordingSink::default()), window);
        (gate, store)
    }

    #[test]
    fn duplicate_inside_window_suppressed_after_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, store) = gate(&dir, Duration::from_secs(300));

        let t0 = Utc::now();
        assert!(gate.should_fire_at("disk-full", t0));
        store.stamp("disk-full", t0).unwrap();

        // 200s later: still inside the 300s window.
        assert!(!gate.should_fire_at("disk-full", t0 + ChronoDuration::seconds(200)));
        // 305s later: window elapsed.
        assert!(gate.should_fire_at("disk-full", t0 + ChronoDuration::seconds(305)));
        // Boundary: exactly the window is a delivery.
        assert!(gate.should_fire_at("disk-full", t0 + ChronoDuration::seconds(300)));
    }

    #[test]
    fn distinct_keys_do_not_share_cooldowns() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, store) = gate(&dir, Duration::from_secs(300));
        let t0 = Utc::now();
        store.stamp("disk-full", t0).unwrap();
        assert!(gate.should_fire_at("tunnel-stop", t0 + ChronoDuration::seconds(1)));
    }

    #[tokio::test]
    async fn notify_delivers_then_suppresses() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let sink = RecordingSink::default();
        let sent = sink.sent.clone();
        let gate = CooldownGate::new(store, Box::new(sink), Duration::from_secs(300));

        let first = gate.notify("mod:fail", "db-pause failed", AlertLevel::Error).await;
        assert_eq!(first, AlertDisposition::Delivered);
        let second = gate.notify("mod:fail", "db-pause failed", AlertLevel::Error).await;
        assert_eq!(second, AlertDisposition::Suppressed);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, AlertLevel::Error);
    }

    #[tokio::test]
    async fn zero_window_never_suppresses() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        let gate = CooldownGate::new(store, Box::new(RecordingSink::default()), Duration::ZERO);
        for _ in 0..3 {
            let disposition = gate.notify("k", "m", AlertLevel::Info).await;
            assert_eq!(disposition, AlertDisposition::Delivered);
        }
    }
}
