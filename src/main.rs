//! Training Monitor
//! Tails a training job's JSONL log, derives a progress fraction, and
//! supervises the job process behind a small JSON API.

mod api;
mod config;
mod error;
mod log_tail;
mod monitor;
mod process_manager;
mod progress;
mod watcher;

use std::path::PathBuf;

use clap::Parser;
use config::MonitorConfig;
use monitor::{JobStatus, Monitor};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "training-monitor", version, about)]
struct Cli {
    /// Config file (defaults to monitor.json next to the executable)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address for the status endpoint, overrides the config file
    #[arg(long)]
    bind: Option<String>,

    /// Write the effective config to the config path and exit
    #[arg(long)]
    init_config: bool,

    /// Start the training job immediately
    #[arg(long)]
    start: bool,

    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(MonitorConfig::config_path);
    let mut config = MonitorConfig::load(&config_path)?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    if cli.init_config {
        config.save(&config_path)?;
        println!("Wrote config to {}", config_path.display());
        return Ok(());
    }

    tracing::info!(
        log = %config.log_path.display(),
        program = %config.job.program,
        "monitoring training log"
    );

    let monitor = Monitor::new(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(monitor::run(
        monitor.clone(),
        config.poll_interval(),
        config.debounce(),
        shutdown_rx,
    ));

    if cli.start {
        let starter = monitor.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || starter.start()).await? {
            tracing::error!(error = %e, "could not start training job");
        }
    }

    api::serve(monitor.clone(), &config.bind, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutting down");
    })
    .await?;

    // Leave no orphaned training job behind.
    if monitor.snapshot().status == JobStatus::Running {
        let stopper = monitor.clone();
        let report = tokio::task::spawn_blocking(move || stopper.stop()).await?;
        if let Some(outcome) = report.outcome {
            tracing::info!(%outcome, "stopped training job on exit");
        }
    }

    let _ = shutdown_tx.send(true);
    monitor_task.await?;
    Ok(())
}
