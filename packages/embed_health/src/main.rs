use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

use embed_health::HealthMonitor;
use embed_health::config::{self, FileConfig};
use signal_tap::LogBus;

mod cli;

#[derive(Parser)]
#[command(name = "embed-health")]
#[command(about = "Infer the connection health of an embedded web application")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom config directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the embedded application's console output on stdin (default)
    Watch(WatchArgs),

    /// Print the resolved configuration
    Config,
}

#[derive(Parser, Default)]
struct WatchArgs {
    /// URL of the embedded application (overrides the configured endpoint)
    #[arg(long)]
    endpoint: Option<String>,

    /// Print snapshots as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli.config_dir.unwrap_or_else(config::default_config_dir);
    let file_config: FileConfig = config::load_config(&config_dir)
        .extract()
        .with_context(|| format!("Failed to load configuration from {:?}", config_dir))?;

    match cli.command {
        Some(Commands::Config) => cli::config_command(&file_config),
        Some(Commands::Watch(args)) => run_watch(args, &file_config, cli.debug).await,
        None => run_watch(WatchArgs::default(), &file_config, cli.debug).await,
    }
}

async fn run_watch(args: WatchArgs, file_config: &FileConfig, debug: bool) -> Result<()> {
    let bus = init_logging(debug);
    let endpoint = args
        .endpoint
        .unwrap_or_else(|| file_config.endpoint.clone());
    cli::watch_command(file_config, &endpoint, args.json, bus).await
}

/// Install the fmt layer (filtered) and the log bus layer (unfiltered, so every
/// level reaches the engine). Our own diagnostics are kept off the bus.
fn init_logging(debug: bool) -> LogBus {
    let default_directive = if debug {
        "embed_health=debug,info"
    } else {
        "embed_health=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let bus = LogBus::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter),
        )
        .with(HealthMonitor::tap_layer(&bus))
        .init();
    bus
}
