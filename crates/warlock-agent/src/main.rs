//! `warlock-agent` - keeps this host connected to the Warlock panel.
//!
//! Loads `/etc/warlock/agent.conf` (or `--config`), sets up logging and
//! runs the connection manager until SIGINT or SIGTERM.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tracing::info;

use warlock_agent::{AGENT_VERSION, AgentContext, ConnectionConfig, ConnectionManager, Outbound};
use warlock_config::{AgentConfig, DEFAULT_CONFIG_PATH};
use warlock_telemetry::prelude::*;

/// Warlock agent: remote execution for the Warlock panel.
#[derive(Parser)]
#[command(name = "warlock-agent")]
#[command(author, version, about = "Warlock agent: remote execution for the Warlock panel")]
struct Args {
    /// Path to the agent configuration file.
    #[arg(long, env = "WARLOCK_AGENT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Log format: pretty, compact, json or full.
    #[arg(long)]
    log_format: Option<String>,

    /// Write daily-rotated log files to this directory instead of stderr.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log to stdout instead of stderr.
    #[arg(long, conflicts_with = "log_dir")]
    log_stdout: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AgentConfig::load(&args.config).with_context(|| {
        format!(
            "Failed to load config from {}; it must contain PANEL_URL and AGENT_TOKEN",
            args.config.display()
        )
    })?;

    let level = if args.verbose {
        "debug"
    } else {
        config.log_filter.as_str()
    };
    let format: LogFormat = args
        .log_format
        .as_deref()
        .unwrap_or(config.log_format.as_str())
        .parse()
        .context("Invalid log format")?;
    let mut log_config = LogConfig::new(level)
        .with_format(format)
        .with_directive("tungstenite=warn")
        .with_directive("tokio_tungstenite=warn");
    if args.log_stdout {
        log_config = log_config.with_target(LogTarget::Stdout);
    } else if let Some(dir) = args.log_dir.clone().or_else(|| config.log_dir.clone()) {
        log_config = log_config.with_file_logging(dir);
    }
    let log_config = log_config.adapt_to_environment();
    if let Err(e) = setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(
        version = AGENT_VERSION,
        config = %args.config.display(),
        panel = %config.panel_url,
        "Warlock agent starting"
    );

    let (outbound, outbound_rx) = Outbound::channel();
    let context =
        AgentContext::from_config(&config, outbound).context("Failed to initialise agent")?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut manager = ConnectionManager::new(
        ConnectionConfig::from_agent(&config),
        context,
        outbound_rx,
        shutdown_rx,
    );

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let signals = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
        let _ = shutdown_tx.send(());
    });

    manager.run().await;
    signals.abort();

    info!("Warlock agent stopped");
    Ok(())
}
