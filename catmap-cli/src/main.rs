//! catmap CLI - command-line interface
//!
//! Drives the catmap library the way a map view would: select maps, fetch
//! the tile under a position, search and share tracks, record fixes.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;
use tracing::error;

use catmap::config::{default_config_path, AppConfig, ConfigFile};
use catmap::logging::{self, LoggingGuard};

use crate::commands::{config, maps, project, record, tile, tracks};
use crate::error::CliError;

/// Session state file kept in the data directory.
const STATE_FILE: &str = "session.json";

#[derive(Debug, Parser)]
#[command(name = "catmap", version, about = "Offline-tolerant slippy map tools")]
struct Cli {
    /// Configuration file (INI)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the configuration file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a position to normalized coordinates and a tile
    Project(project::ProjectArgs),

    /// List or add map sources
    Maps {
        #[command(subcommand)]
        action: maps::MapsAction,
    },

    /// Load or download the tile under a position
    Tile(tile::TileArgs),

    /// Manage saved tracks
    Tracks {
        #[command(subcommand)]
        action: tracks::TracksAction,
    },

    /// Record JSON fixes read from stdin into a new track
    Record(record::RecordArgs),

    /// Show the effective configuration
    Config {
        #[command(subcommand)]
        action: config::ConfigAction,
    },
}

/// Everything commands share.
pub struct Context {
    pub config: AppConfig,
    pub config_path: PathBuf,
    runtime: Option<Runtime>,
}

impl Context {
    fn new(cli: &Cli) -> Result<Self, CliError> {
        let config_path = cli.config.clone().unwrap_or_else(default_config_path);
        let file = ConfigFile::load(&config_path)?;
        let mut config = AppConfig::from_config_file(&file);
        if let Some(dir) = &cli.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(level) = &cli.log_level {
            config.log_level = level.clone();
        }
        Ok(Self {
            config,
            config_path,
            runtime: None,
        })
    }

    /// The async runtime, created on first use.
    pub fn runtime(&mut self) -> Result<&Runtime, CliError> {
        if self.runtime.is_none() {
            self.runtime = Some(Runtime::new()?);
        }
        self.runtime
            .as_ref()
            .ok_or_else(|| CliError::Config("runtime unavailable".to_string()))
    }

    pub fn state_path(&self) -> PathBuf {
        self.config.data_dir.join(STATE_FILE)
    }

    fn init_logging(&self) -> Option<LoggingGuard> {
        let log_dir = self.config.log_dir();
        if std::fs::create_dir_all(&log_dir).is_err() {
            return None;
        }
        Some(logging::init(&log_dir, &self.config.log_level))
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut ctx = Context::new(&cli)?;
    let _guard = ctx.init_logging();

    match cli.command {
        Commands::Project(args) => project::run(args),
        Commands::Maps { action } => maps::run(&ctx, action),
        Commands::Tile(args) => tile::run(&mut ctx, args),
        Commands::Tracks { action } => tracks::run(&mut ctx, action),
        Commands::Record(args) => record::run(&mut ctx, args),
        Commands::Config { action } => config::run(&ctx, action),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
