//! ---
//! havoc_section: "01-runtime-foundation"
//! havoc_subsection: "module"
//! havoc_type: "source"
//! havoc_scope: "code"
//! havoc_description: "Shared logging and runtime primitives."
//! havoc_version: "v0.0.0-prealpha"
//! havoc_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "HAVOC_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the drill tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Human-oriented output for interactive drill sessions.
    #[default]
    Pretty,
    /// Structured JSON for post-mortem ingestion.
    StructuredJson,
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

/// Logging settings shared by every binary in the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory receiving the rolling daily log file.
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    /// Optional prefix overriding the service name in the file name.
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Console output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            file_prefix: None,
            format: LogFormat::default(),
        }
    }
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `HAVOC_LOG` overrides the log filter (e.g. `info`, `debug,havoc_fleet=trace`).
///   When unset the standard `RUST_LOG` variable is honoured, finally falling back
///   to a default derived from the `-v` count on the command line.
/// * Console output defaults to a pretty format since drills are human-supervised;
///   a rolling daily JSON file is always written for post-mortem analysis.
pub fn init_tracing(service_name: &str, config: &LoggingConfig, verbosity: u8) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config
        .file_prefix
        .clone()
        .unwrap_or_else(|| service_name.to_owned());

    let file_appender = daily(&config.directory, format!("{prefix}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let fallback = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // `HAVOC_LOG` wins, then `RUST_LOG`, then the verbosity fallback.
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); defaulting to {fallback}");
            EnvFilter::new(fallback)
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    };

    let fmt_layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_target(false)
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}
