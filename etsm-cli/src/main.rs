//! etsm - provisioning and management of dedicated Enemy Territory servers
//!
//! Thin dispatch layer over etsm-core: every verb resolves its arguments
//! (server name, sources URL, root directory) once, then calls into the
//! engine. User-facing output goes to stdout; logs go to stderr.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use etsm_core::paths::EtsmPaths;
use etsm_core::settings::Settings;

mod catalog_cli;
mod config_cli;
mod server_cli;
mod settings_cli;
mod sources_cli;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "etsm",
    about = "Provision and manage dedicated Enemy Territory servers",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Override the etsm root directory (default: $ETSM_ROOT or /var/lib/etsm)
    #[clap(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Refresh the catalog index and populate the cache
    Sources {
        #[clap(subcommand)]
        command: sources_cli::SourcesCommand,
    },

    /// Browse the asset catalog
    Catalog {
        #[clap(subcommand)]
        command: catalog_cli::CatalogCommand,
    },

    /// Create, reconcile and inspect server instances
    Server {
        #[clap(subcommand)]
        command: server_cli::ServerCommand,
    },

    /// Edit and activate server config files
    Config {
        #[clap(subcommand)]
        command: config_cli::ConfigCommand,
    },

    /// Operator settings (default server, sources URL)
    Settings {
        #[clap(subcommand)]
        command: settings_cli::SettingsCommand,
    },
}

/// Logs always go to stderr so stdout stays machine-readable
fn initialize_tracing(log_level: &LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level.to_filter_directive()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    let paths = EtsmPaths::discover_with_override(cli.root)?;
    tracing::debug!("Using etsm root {}", paths.root().display());
    let settings = Settings::load()?;

    match cli.command {
        Command::Sources { command } => command.execute(&paths, &settings).await,
        Command::Catalog { command } => command.execute(&paths, &settings).await,
        Command::Server { command } => command.execute(&paths, &settings).await,
        Command::Config { command } => command.execute(&paths, &settings).await,
        Command::Settings { command } => command.execute(&settings).await,
    }
}
