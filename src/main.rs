//! ddmetrics - disk write benchmarks as a Prometheus endpoint.
//!
//! Serves `/metrics` in the foreground while a background task runs the
//! dd trial matrix for the configured number of passes.

#![forbid(unsafe_code)]

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ddmetrics::config::{self, CliOverrides, Settings};
use ddmetrics::{
    BenchmarkRunner, DdMetrics, Driver, FilePolicy, LogConfig, http_api, init_logging,
};

#[derive(Parser)]
#[command(name = "ddmetrics")]
#[command(author, version, about = "Repeated dd write benchmarks exported as Prometheus metrics")]
#[command(after_help = "The legacy single-dash forms (-bind, -loop_count, -write_on_dir, \
-file_policy, with a space or '=' before the value) are also accepted.")]
struct Cli {
    /// The socket to bind to [default: :8080]
    #[arg(long)]
    bind: Option<String>,

    /// How many times to loop over all the dd writes [default: 10]
    #[arg(long = "loop_count")]
    loop_count: Option<u32>,

    /// Directory where the target disk is mounted [default: system temp dir]
    #[arg(long = "write_on_dir")]
    write_on_dir: Option<PathBuf>,

    /// Write a fresh file per trial, or overwrite one file [default: unique]
    #[arg(long = "file_policy", value_enum)]
    file_policy: Option<FilePolicy>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example config file and exit
    #[arg(long)]
    print_example_config: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_from(legacy_args(std::env::args_os()));

    if cli.print_example_config {
        print!("{}", config::example_config());
        return Ok(());
    }

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let file_config = config::load_file_config(cli.config.as_deref())?;
    let settings = Settings::resolve(
        file_config,
        CliOverrides {
            bind: cli.bind,
            loop_count: cli.loop_count,
            write_on_dir: cli.write_on_dir,
            file_policy: cli.file_policy,
        },
    )?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        dir = %settings.write_on_dir.display(),
        loop_count = settings.loop_count,
        file_policy = ?settings.file_policy,
        "Starting ddmetrics"
    );

    let metrics = Arc::new(
        DdMetrics::new(env!("CARGO_PKG_VERSION")).context("Failed to register metrics")?,
    );
    let shutdown = CancellationToken::new();

    let runner = BenchmarkRunner::new(settings.runner_config(), metrics.clone());
    let driver = Driver::new(settings.driver_config(), Arc::new(runner));
    let _driver_handle = driver.spawn(shutdown.clone());

    let listener = http_api::bind(&settings.listen_addr()).await?;

    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    http_api::serve(listener, metrics, shutdown).await?;
    info!("ddmetrics stopped");
    Ok(())
}

/// Flags older deployments pass with a single dash.
const LEGACY_FLAGS: &[&str] = &["bind", "loop_count", "write_on_dir", "file_policy"];

/// Rewrite `-name` and `-name=value` for the legacy flags into their
/// double-dash form. Everything else passes through untouched.
fn legacy_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            let rewritten = arg.to_str().and_then(|s| {
                let rest = s.strip_prefix('-').filter(|r| !r.starts_with('-'))?;
                let name = rest.split_once('=').map_or(rest, |(name, _)| name);
                LEGACY_FLAGS
                    .contains(&name)
                    .then(|| OsString::from(format!("-{s}")))
            });
            rewritten.unwrap_or(arg)
        })
        .collect()
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
async fn shutdown_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
