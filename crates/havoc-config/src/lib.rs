//! ---
//! havoc_section: "02-configuration"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Campaign and fleet configuration loading and validation."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use havoc_common::LoggingConfig;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

fn default_rounds() -> u32 {
    1
}

fn default_round_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_state_dir() -> PathBuf {
    std::env::temp_dir().join("havoc")
}

fn default_fleet_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(300)
}

fn default_strategy() -> FleetStrategy {
    FleetStrategy::Restart
}

/// How the healer treats damaged containers after verification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FleetStrategy {
    /// Log damaged containers and leave them broken.
    Report,
    /// Restart damaged containers in dependency order with bounded polling.
    Restart,
}

/// Top-level configuration for one drill invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HavocConfig {
    #[serde(default)]
    pub campaign: CampaignSettings,
    #[serde(default)]
    pub fleet: FleetSettings,
    /// Module name to direct-impact containers. Absence of a mapping marks a
    /// host-level fault with no zone0 contribution.
    #[serde(default)]
    pub impact: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub modules: ModuleSettings,
}

/// Round-loop settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSettings {
    /// Number of break/verify/heal rounds to run.
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Wall-clock budget for one module's recovery poll.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_round_timeout")]
    pub round_timeout: Duration,
    /// Fixed interval between recovery probes.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Root directory for the run-scoped snapshot and cooldown store.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Invoke each module's heal operation during recovery polling.
    #[serde(default)]
    pub self_heal: bool,
    /// Capture steady state and verify the fleet each round.
    #[serde(default = "default_fleet_check")]
    pub fleet_check: bool,
    /// Damaged-container handling strategy.
    #[serde(default = "default_strategy")]
    pub fleet_strategy: FleetStrategy,
}

fn default_fleet_check() -> bool {
    true
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            round_timeout: default_round_timeout(),
            poll_interval: default_poll_interval(),
            state_dir: default_state_dir(),
            self_heal: false,
            fleet_check: true,
            fleet_strategy: default_strategy(),
        }
    }
}

/// Fleet topology settings. Configuration order is authoritative.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSettings {
    /// Containers matching this pattern are excluded from auto-discovery.
    #[serde(default)]
    pub skip_pattern: Option<String>,
    /// Recovery timeout applied when an entry does not carry its own.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_fleet_timeout")]
    pub default_timeout: Duration,
    /// Ordered records: container, optional health URL, optional dependency
    /// names, optional timeout override.
    #[serde(default)]
    pub containers: Vec<FleetEntry>,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            skip_pattern: None,
            default_timeout: default_fleet_timeout(),
            containers: Vec::new(),
        }
    }
}

/// One configured fleet record.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetEntry {
    pub name: String,
    #[serde(default)]
    pub health_url: Option<Url>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub timeout: Option<Duration>,
}

/// Alert delivery settings.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Same-key alerts inside this window are suppressed.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_cooldown")]
    pub cooldown: Duration,
    /// Optional webhook endpoint; alerts always land in the log regardless.
    #[serde(default)]
    pub webhook_url: Option<Url>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldown: default_cooldown(),
            webhook_url: None,
        }
    }
}

/// Per-module settings tables, keyed by module name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSettings {
    /// Module subset registered at startup; empty means all built-ins.
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default, rename = "dns-poison")]
    pub dns_poison: DnsPoisonSettings,
    #[serde(default, rename = "db-pause")]
    pub db_pause: DbPauseSettings,
    #[serde(default, rename = "sock-perms")]
    pub sock_perms: SockPermsSettings,
    #[serde(default, rename = "tunnel-stop")]
    pub tunnel_stop: TunnelStopSettings,
    #[serde(default, rename = "disk-fill")]
    pub disk_fill: DiskFillSettings,
    #[serde(default, rename = "storage-health")]
    pub storage_health: StorageHealthSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsPoisonSettings {
    /// Hosts file receiving the poison entry.
    pub hosts_file: PathBuf,
    /// Name whose resolution the drill poisons.
    pub probe_host: String,
    /// Black-hole address the poisoned name resolves to.
    pub sink_address: String,
}

impl Default for DnsPoisonSettings {
    fn default() -> Self {
        Self {
            hosts_file: PathBuf::from("/etc/hosts"),
            probe_host: "registry.fleet.internal".to_owned(),
            sink_address: "0.0.0.0".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbPauseSettings {
    /// Database container the module pauses.
    pub container: String,
}

impl Default for DbPauseSettings {
    fn default() -> Self {
        Self {
            container: "db".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SockPermsSettings {
    /// Control-plane socket whose permissions the module corrupts.
    pub socket_path: PathBuf,
}

impl Default for SockPermsSettings {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/docker.sock"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelStopSettings {
    /// Tunnel container the module stops.
    pub container: String,
}

impl Default for TunnelStopSettings {
    fn default() -> Self {
        Self {
            container: "tunnel".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskFillSettings {
    /// Ballast file the module writes.
    pub ballast_file: PathBuf,
    /// Ballast size in mebibytes; running out of space mid-write still counts
    /// as injected.
    pub fill_mb: u64,
}

impl Default for DiskFillSettings {
    fn default() -> Self {
        Self {
            ballast_file: PathBuf::from("/var/tmp/havoc.ballast"),
            fill_mb: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageHealthSettings {
    /// Device queried for SMART health.
    pub device: PathBuf,
}

impl Default for StorageHealthSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/sda"),
        }
    }
}

/// Metadata describing where a [`HavocConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HavocConfig,
    pub source: Option<PathBuf>,
}

impl HavocConfig {
    pub const ENV_CONFIG_PATH: &'static str = "HAVOC_CONFIG";

    /// Load configuration from disk, respecting the `HAVOC_CONFIG` override.
    /// When no candidate exists the built-in defaults are returned, since a
    /// drill against auto-discovered containers needs no config file at all.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        let config = HavocConfig::default();
        config.validate()?;
        Ok(LoadedConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<HavocConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants. Violations are fatal at startup,
    /// before any injection.
    pub fn validate(&self) -> Result<()> {
        if self.campaign.rounds == 0 {
            return Err(anyhow!("campaign.rounds must be at least 1"));
        }
        if self.campaign.poll_interval.is_zero() {
            return Err(anyhow!("campaign.poll_interval must be non-zero"));
        }

        if let Some(pattern) = &self.fleet.skip_pattern {
            regex::Regex::new(pattern)
                .with_context(|| format!("fleet.skip_pattern {pattern:?} is not a valid regex"))?;
        }

        let mut names = IndexSet::new();
        for entry in &self.fleet.containers {
            if entry.name.trim().is_empty() {
                return Err(anyhow!("fleet entry with empty container name"));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(anyhow!("duplicate fleet entry {}", entry.name));
            }
        }
        // Topology is config-authoritative: a dependency on a name that is
        // only ever auto-discovered cannot be ordered or zoned.
        for entry in &self.fleet.containers {
            for dep in &entry.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(anyhow!(
                        "container {} depends on {dep}, which is not a configured container",
                        entry.name
                    ));
                }
            }
        }
        for (module, targets) in &self.impact {
            for target in targets {
                if !names.contains(target.as_str()) {
                    return Err(anyhow!(
                        "impact mapping for {module} names {target}, which is not a configured container"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Timeout for a configured entry, falling back to the fleet default.
    pub fn entry_timeout(&self, entry: &FleetEntry) -> Duration {
        entry.timeout.unwrap_or(self.fleet.default_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests touching HAVOC_CONFIG must not interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const SAMPLE: &str = r#"
        [campaign]
        rounds = 3
        round_timeout = 90
        self_heal = true

        [fleet]
        skip_pattern = "^buildkit"
        default_timeout = 45

        [[fleet.containers]]
        name = "db"

        [[fleet.containers]]
        name = "app"
        health_url = "http://127.0.0.1:8080/health"
        depends_on = ["db"]
        timeout = 90

        [impact]
        db-pause = ["db"]

        [alerts]
        cooldown = 120

        [modules.db-pause]
        container = "db"
    "#;

    #[test]
    fn parses_sample_and_preserves_order() {
        let config: HavocConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.campaign.rounds, 3);
        assert_eq!(config.campaign.round_timeout, Duration::from_secs(90));
        assert!(config.campaign.self_heal);
        assert_eq!(config.fleet.containers.len(), 2);
        assert_eq!(config.fleet.containers[0].name, "db");
        assert_eq!(config.fleet.containers[1].name, "app");
        assert_eq!(
            config.fleet.containers[1].timeout,
            Some(Duration::from_secs(90))
        );
        assert_eq!(config.entry_timeout(&config.fleet.containers[0]), Duration::from_secs(45));
        assert_eq!(config.alerts.cooldown, Duration::from_secs(120));
        assert_eq!(config.impact["db-pause"], vec!["db".to_owned()]);
    }

    #[test]
    fn rejects_duplicate_container() {
        let raw = r#"
            [[fleet.containers]]
            name = "db"
            [[fleet.containers]]
            name = "db"
        "#;
        let config: HavocConfig = toml::from_str(raw).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate fleet entry"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let raw = r#"
            [[fleet.containers]]
            name = "app"
            depends_on = ["db"]
        "#;
        let config: HavocConfig = toml::from_str(raw).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not a configured container"));
    }

    #[test]
    fn rejects_unknown_impact_target() {
        let raw = r#"
            [[fleet.containers]]
            name = "db"
            [impact]
            db-pause = ["postgres"]
        "#;
        let config: HavocConfig = toml::from_str(raw).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }

    #[test]
    fn rejects_bad_skip_pattern() {
        let raw = r#"
            [fleet]
            skip_pattern = "["
        "#;
        let config: HavocConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_override_wins_over_candidates() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let env_config = dir.path().join("env.toml");
        fs::write(&env_config, "[campaign]\nrounds = 7\n").unwrap();
        let candidate = dir.path().join("candidate.toml");
        fs::write(&candidate, "[campaign]\nrounds = 2\n").unwrap();

        std::env::set_var(HavocConfig::ENV_CONFIG_PATH, &env_config);
        let loaded = HavocConfig::load(&[&candidate]).unwrap();
        std::env::remove_var(HavocConfig::ENV_CONFIG_PATH);

        assert_eq!(loaded.config.campaign.rounds, 7);
        assert_eq!(loaded.source, Some(env_config));
    }

    #[test]
    fn missing_candidates_fall_back_to_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(HavocConfig::ENV_CONFIG_PATH);
        let loaded = HavocConfig::load(&[PathBuf::from("does/not/exist.toml")]).unwrap();
        assert!(loaded.source.is_none());
        assert_eq!(loaded.config.campaign.rounds, 1);
        assert_eq!(loaded.config.campaign.fleet_strategy, FleetStrategy::Restart);
    }
}
