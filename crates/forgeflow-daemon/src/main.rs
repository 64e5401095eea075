//! Forgeflow daemon.
//!
//! Runs the service supervisor with in-process collaborators, accepting
//! work requests until Ctrl+C.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use forgeflow_core::Config;
use forgeflow_core::tracing_init::init_tracing;
use forgeflow_daemon::collab::memory;
use forgeflow_daemon::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "forgeflow-daemon")]
#[command(version, about = "Forgeflow daemon - policy-driven build orchestration")]
struct Args {
    /// Path to forgeflow.toml
    #[arg(long, env = "FORGEFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, env = "FORGEFLOW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "FORGEFLOW_LOG_JSON")]
    log_json: bool,

    /// Seconds between staleness scans; 0 disables the periodic scan.
    #[arg(long, default_value_t = 0, env = "FORGEFLOW_SCAN_INTERVAL")]
    scan_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }
    if args.log_json {
        config.daemon.log_json = true;
    }

    init_tracing(&config.daemon.log_level, config.daemon.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        checkpoint_after_events = config.supervisor.checkpoint_after_events,
        scan_interval = args.scan_interval,
        "Starting forgeflow-daemon"
    );

    let (_registry, collab) = memory::collaborators();
    let (supervisor, handle) = Supervisor::new(config, collab);
    let supervisor_task = tokio::spawn(supervisor.run());

    // Periodic staleness scan, when enabled.
    let scan_task = (args.scan_interval > 0).then(|| {
        let scan_handle = handle.clone();
        let interval = Duration::from_secs(args.scan_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if scan_handle.trigger_scan().await.is_err() {
                    break;
                }
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    if let Some(task) = scan_task {
        task.abort();
    }
    handle.shutdown().await?;

    let state = supervisor_task.await?;
    info!(
        completed = state.stats.total_completed,
        failed = state.stats.total_failed,
        skipped = state.stats.total_skipped,
        "Daemon stopped"
    );
    Ok(())
}
