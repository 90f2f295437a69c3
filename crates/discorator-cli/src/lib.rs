//! Discorator command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Discorator - gateway session client
#[derive(Parser)]
#[command(name = "discorator")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file
    #[arg(short, long, env = "DISCORATOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Connect a gateway session and log every event
    Connect(commands::connect::ConnectArgs),

    /// Compute an intents bitmask from names
    Intents(commands::intents::IntentsArgs),

    /// Print the close-code policy table
    CloseCodes,

    /// Configuration management
    Config(commands::config::ConfigArgs),

    /// Show version information
    Version,
}

/// Run the CLI with the given arguments.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Connect(mut args) => {
            args.lifecycle |= cli.verbose > 0;
            commands::connect::run(args, cli.config.as_deref()).await
        }
        Commands::Intents(args) => commands::intents::run(args),
        Commands::CloseCodes => commands::close_codes::run(cli.config.as_deref()),
        Commands::Config(args) => commands::config::run(args, cli.config.as_deref()),
        Commands::Version => {
            println!("discorator {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
