//! Tether Daemon - Main entry point
//!
//! Drives a tracking session against the simulated provider and serves it
//! over REST and WebSocket.

mod api;
mod config;
mod scenario;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Trackable synchronization and anchor persistence daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "tether.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run this many cycles without the web server, print a summary and exit
    #[arg(long)]
    cycles: Option<u64>,

    /// Write an example configuration to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Tether v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        println!("Wrote example configuration to {}", args.config.display());
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Override bind address if specified
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        cycle_hz = config.daemon.cycle_hz,
        store = %config.store.path,
        sightings = config.simulation.sightings.len(),
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone())?;

    if let Some(cycles) = args.cycles {
        // Headless mode
        info!(cycles, "Running headless cycles");
        let mut events = 0;
        for _ in 0..cycles {
            events += state.run_cycle().await.len();
        }

        let status = state.status().await;
        println!("Ran {} cycles, {} events", status.cycle, events);
        for kind in &status.kinds {
            println!(
                "  {:<7} tracking={} live={} dropped_batches={}",
                kind.kind.as_str(), kind.tracking, kind.live, kind.dropped_batches
            );
        }
        let durable = state.session.write().await.enumerate_durable_ids();
        println!(
            "Durable anchors ({}), persistence {}:",
            durable.len(),
            if status.persistence_enabled { "enabled" } else { "disabled" }
        );
        for id in durable {
            println!("  - {}", id);
        }
    } else {
        // Daemon mode - run frame loop and web server
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
