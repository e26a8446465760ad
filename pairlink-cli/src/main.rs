//! Pairlink CLI - Command-line interface
//!
//! This binary runs the pairlink rendezvous/relay service.
//!
//! # Configuration
//!
//! Settings are loaded from `~/.pairlink/config.ini` on startup.
//! CLI arguments override config file values when specified.

mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use error::CliError;
use pairlink::config::{ConfigFile, Settings};
use pairlink::logging::init_logging;
use pairlink::relay::RelayServer;
use pairlink::socket::TcpSocketService;

#[derive(Parser)]
#[command(name = "pairlink")]
#[command(version = pairlink::VERSION)]
#[command(about = "TCP rendezvous and relay for supply and demand peers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file at ~/.pairlink/config.ini
    Init,

    /// Run the relay service
    Run {
        /// Port supply peers connect to (default: from config)
        #[arg(long)]
        supply_port: Option<u16>,

        /// Port demand peers connect to (default: from config)
        #[arg(long)]
        demand_port: Option<u16>,

        /// Port driver clients connect to; 0 disables (default: from config)
        #[arg(long)]
        driver_port: Option<u16>,

        /// Log every forwarded chunk and idle timeout
        #[arg(long)]
        verbose: bool,

        /// Disconnect descriptors idle for this many seconds; 0 disables
        #[arg(long)]
        idle_timeout: Option<u32>,

        /// Seconds between quiet-period backlog reports; 0 disables
        #[arg(long)]
        driver_period: Option<u32>,

        /// Read configuration from this file instead of the default
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => run_init(),
        Commands::Run {
            supply_port,
            demand_port,
            driver_port,
            verbose,
            idle_timeout,
            driver_period,
            config,
        } => run_relay(
            supply_port,
            demand_port,
            driver_port,
            verbose,
            idle_timeout,
            driver_period,
            config,
        ),
    };

    if let Err(e) = result {
        e.exit();
    }
}

/// Initialize configuration file.
fn run_init() -> Result<(), CliError> {
    let path = ConfigFile::ensure_exists()?;
    println!("Configuration file: {}", path.display());
    println!();
    println!("Edit this file to customize pairlink settings.");
    println!("CLI arguments override config file values when specified.");
    Ok(())
}

/// Resolve settings from the config file and CLI overrides.
fn resolve_settings(
    supply_port: Option<u16>,
    demand_port: Option<u16>,
    driver_port: Option<u16>,
    verbose: bool,
    idle_timeout: Option<u32>,
    driver_period: Option<u32>,
    config: Option<PathBuf>,
) -> Result<Settings, CliError> {
    let file = match config {
        Some(path) => ConfigFile::load_from(&path)?,
        None => ConfigFile::load()?,
    };

    let mut settings = file.to_settings();
    if let Some(port) = supply_port {
        settings.supply_port = port;
    }
    if let Some(port) = demand_port {
        settings.demand_port = port;
    }
    if let Some(port) = driver_port {
        settings.driver_port = port;
    }
    if verbose {
        settings.verbose = true;
    }
    if let Some(seconds) = idle_timeout {
        settings.idle_timeout = seconds;
    }
    if let Some(seconds) = driver_period {
        settings.driver_period = seconds;
    }
    Ok(settings)
}

#[allow(clippy::too_many_arguments)]
fn run_relay(
    supply_port: Option<u16>,
    demand_port: Option<u16>,
    driver_port: Option<u16>,
    verbose: bool,
    idle_timeout: Option<u32>,
    driver_period: Option<u32>,
    config: Option<PathBuf>,
) -> Result<(), CliError> {
    let settings = resolve_settings(
        supply_port,
        demand_port,
        driver_port,
        verbose,
        idle_timeout,
        driver_period,
        config,
    )?;

    let _log = init_logging()?;

    let mut service = TcpSocketService::new().map_err(CliError::Socket)?;
    let mut server = RelayServer::new(settings);
    server.run(&mut service)?;

    Ok(())
}
