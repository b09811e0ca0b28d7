//! Clipbird CLI - LAN clipboard sync.

mod commands;
mod ui;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use clipbird_core::{Config, HostType};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clipbird")]
#[command(about = "LAN clipboard sync", long_about = None)]
struct Cli {
    /// Device name shown to peers (defaults to the hostname)
    #[arg(short, long, global = true)]
    name: Option<String>,

    /// Config file (defaults to config.toml in the data directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Port for the server role
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Log filter, e.g. "clipbird=debug"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start syncing (default); uses the last role unless one is given
    Run {
        /// Act as the server other hosts connect to
        #[arg(long, conflicts_with = "client")]
        server: bool,
        /// Connect to a server on the LAN
        #[arg(long)]
        client: bool,
    },
    /// Show device info
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::from_default_env()
            .add_directive("clipbird=info".parse()?)
            .add_directive("clipbird_core=info".parse()?)
            .add_directive("mdns_sd=warn".parse()?),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run {
        server: false,
        client: false,
    }) {
        Commands::Run { server, client } => {
            let role = match (server, client) {
                (true, _) => Some(HostType::Server),
                (_, true) => Some(HostType::Client),
                _ => None,
            };
            commands::run_service(config, role).await?
        }
        Commands::Info => commands::show_info(&config)?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default().data_dir)?,
    };

    if let Some(name) = &cli.name {
        config.device_name = name.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    config.validate()?;
    Ok(config)
}
