//! ---
//! havoc_section: "09-cli"
//! havoc_subsection: "binary"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Binary entrypoint for the havocctl drill tool."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgAction, Parser};
use havoc_alert::{AlertSink, CooldownGate, LogSink, WebhookSink};
use havoc_common::init_tracing;
use havoc_config::{FleetStrategy, HavocConfig};
use havoc_control::{ContainerRuntime, DockerCli, HealthProbe, HttpProbe};
use havoc_engine::{new_registry, Campaign, CampaignMetrics, CampaignOptions};
use havoc_fleet::FleetGraph;
use havoc_modules::{builtin_registry, ModuleRegistry};
use havoc_store::RunStore;
use tokio::signal;
use tracing::{debug, info, warn};

const EXIT_FAILURE: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Havoc fleet fault drill",
    long_about = "Breaks selected services in a containerized fleet, measures recovery, and \
                  verifies that untargeted services survived without collateral damage."
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "N", help = "Number of drill rounds")]
    rounds: Option<u32>,

    #[arg(
        long,
        value_name = "NAMES",
        value_delimiter = ',',
        help = "Comma-separated module subset, in drill order"
    )]
    modules: Option<Vec<String>>,

    #[arg(long, help = "Invoke each module's heal operation during recovery polling")]
    self_heal: bool,

    #[arg(long, help = "Emergency restore from the latest leftover run state, then exit")]
    restore: bool,

    #[arg(long, help = "Log intended actions without mutating anything")]
    dry_run: bool,

    #[arg(long, help = "List registered modules and exit")]
    list: bool,

    #[arg(long, value_name = "SECS", help = "Per-module recovery timeout override")]
    round_timeout: Option<u64>,

    #[arg(long, help = "Skip steady-state capture and fleet verification")]
    no_fleet_check: bool,

    #[arg(
        long,
        value_name = "STRATEGY",
        value_parser = parse_strategy,
        help = "Damaged-container strategy: report or restart"
    )]
    fleet_strategy: Option<FleetStrategy>,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help = "Increase log verbosity (repeatable)"
    )]
    verbose: u8,
}

fn parse_strategy(raw: &str) -> Result<FleetStrategy, String> {
    FleetStrategy::from_str(raw).map_err(|_| format!("unknown strategy {raw:?}; expected report or restart"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/havoc.toml"));
    candidates.push(PathBuf::from("/etc/havoc/havoc.toml"));

    let loaded = HavocConfig::load(&candidates)?;
    let config = loaded.config;
    init_tracing("havocctl", &config.logging, cli.verbose)?;
    match &loaded.source {
        Some(source) => info!(config = %source.display(), "configuration loaded"),
        None => info!("no configuration file found; using built-in defaults"),
    }

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::detect());

    if cli.restore {
        return emergency_restore_mode(&config, runtime, &cli).await;
    }

    let store = RunStore::open(&config.campaign.state_dir)?;
    let registry = builtin_registry(&config.modules, store.clone(), runtime.clone(), cli.dry_run)?;

    if cli.list {
        for module in registry.iter() {
            println!("{:<16} {}", module.name(), module.describe());
        }
        store.teardown();
        return Ok(());
    }

    let probe: Arc<dyn HealthProbe> = Arc::new(HttpProbe::new()?);
    let graph = FleetGraph::build(&config.fleet, runtime.as_ref()).await?;
    let sink: Box<dyn AlertSink> = match &config.alerts.webhook_url {
        Some(url) => Box::new(WebhookSink::new(url.clone())?),
        None => Box::new(LogSink),
    };
    let alerts = CooldownGate::new(store.clone(), sink, config.alerts.cooldown);
    let metrics_registry = new_registry();
    let metrics = CampaignMetrics::new(metrics_registry.clone()).ok();

    let mut options = CampaignOptions::from_config(&config);
    if let Some(rounds) = cli.rounds {
        options.rounds = rounds;
    }
    if let Some(modules) = cli.modules.clone() {
        options.module_filter = Some(modules);
    }
    options.self_heal |= cli.self_heal;
    options.dry_run = cli.dry_run;
    if cli.no_fleet_check {
        options.fleet_check = false;
    }
    if let Some(secs) = cli.round_timeout {
        options.round_timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(strategy) = cli.fleet_strategy {
        options.strategy = strategy;
    }

    let mut campaign = Campaign::new(
        registry,
        graph,
        store.clone(),
        alerts,
        runtime,
        probe,
        config.impact.clone(),
        options,
        metrics,
    )?;

    // The round loop races process interruption; cancellation runs the
    // restore path exactly once, synchronously, before exit.
    let outcome = tokio::select! {
        report = campaign.run() => Some(report),
        _ = signal::ctrl_c() => None,
    };

    match outcome {
        Some(report) => {
            let (restored, failed) = campaign.emergency_restore().await;
            if restored + failed > 0 {
                info!(restored, failed, "end-of-run restore finished");
            }
            print!("{}", report.render());
            let encoder = prometheus::TextEncoder::new();
            if let Ok(text) = encoder.encode_to_string(&metrics_registry.gather()) {
                debug!(metrics = %text, "campaign metrics");
            }
            store.teardown();
            if report.succeeded() {
                Ok(())
            } else {
                std::process::exit(EXIT_FAILURE);
            }
        }
        None => {
            warn!("interrupted; restoring still-broken modules");
            campaign.emergency_restore().await;
            store.teardown();
            std::process::exit(EXIT_INTERRUPTED);
        }
    }
}

/// `--restore`: adopt whatever run state a dead invocation left behind and
/// run every module's restore. Missing snapshots are normal here.
async fn emergency_restore_mode(
    config: &HavocConfig,
    runtime: Arc<dyn ContainerRuntime>,
    cli: &Cli,
) -> Result<()> {
    let Some(store) = RunStore::adopt_latest(&config.campaign.state_dir)? else {
        info!(state_dir = %config.campaign.state_dir.display(), "no leftover run state; nothing to restore");
        return Ok(());
    };
    info!(run_id = %store.run_id(), "restoring from leftover run state");

    let registry = builtin_registry(&config.modules, store.clone(), runtime, false)?;
    let selected = selected_modules(&registry, cli)?;
    for module in selected {
        match module.restore().await {
            Ok(()) => info!(module = module.name(), "restored"),
            Err(err) => warn!(module = module.name(), error = %err, "nothing restored"),
        }
    }
    store.teardown();
    Ok(())
}

fn selected_modules(
    registry: &ModuleRegistry,
    cli: &Cli,
) -> Result<Vec<Arc<dyn havoc_modules::FaultModule>>> {
    match &cli.modules {
        // Resolving through the registry keeps unknown names fatal.
        Some(names) => names.iter().map(|name| registry.resolve(name)).collect(),
        None => Ok(registry.iter().cloned().collect()),
    }
}
