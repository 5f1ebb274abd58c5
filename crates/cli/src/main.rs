//! storesync CLI - drive and observe the merchant store sync engine

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use storesync_core::EngineConfig;

mod commands;
mod logging;

use commands::{cmd_config_init, cmd_config_show, cmd_demo};
use logging::init_cli_logging;

#[derive(Parser)]
#[command(name = "storesync")]
#[command(about = "Merchant store synchronization engine")]
#[command(after_help = "\
QUICK START:
  storesync demo                  # Run a scripted sync end to end
  storesync demo --pause          # Pause and resume halfway through
  storesync demo --fail           # Watch a failing import
  storesync config init           # Write a default storesync.toml")]
struct Cli {
  /// Engine config file (TOML); defaults apply when missing
  #[arg(long, global = true)]
  config: Option<PathBuf>,
  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `storesync config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show the effective configuration as TOML
  Show,
  /// Write a default config file
  Init {
    /// Output path (default: storesync.toml)
    #[arg(long)]
    output: Option<PathBuf>,
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Run a sync against a scripted in-process backend
  #[command(after_help = "\
EXAMPLES:
  storesync demo --products 50 --tick-ms 50
  storesync demo --pause          # Exercise optimistic pause/resume
  storesync demo --cancel         # Cancel halfway through
  storesync demo --fail           # Backend fails mid-import")]
  Demo {
    /// Store to sync
    #[arg(long, default_value = "demo-store")]
    store: String,
    /// Number of products the scripted catalog contains
    #[arg(long, default_value = "20")]
    products: u32,
    /// Milliseconds between progress ticks
    #[arg(long, default_value = "100")]
    tick_ms: u64,
    /// Pause halfway through, then resume
    #[arg(long)]
    pause: bool,
    /// Cancel halfway through instead of finishing
    #[arg(long)]
    cancel: bool,
    /// Make the backend fail the import midway
    #[arg(long)]
    fail: bool,
  },
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  init_cli_logging();

  let config = match cli.config {
    Some(ref path) => EngineConfig::load(path),
    None => EngineConfig::default(),
  };

  match cli.command {
    Commands::Demo {
      store,
      products,
      tick_ms,
      pause,
      cancel,
      fail,
    } => cmd_demo(config, &store, products, tick_ms, pause, cancel, fail).await,

    Commands::Config { command } => match command {
      ConfigCommand::Show => cmd_config_show(&config),
      ConfigCommand::Init { output, force } => cmd_config_init(output.as_deref(), force),
    },
  }
}
