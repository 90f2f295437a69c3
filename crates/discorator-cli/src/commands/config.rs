//! Configuration management commands.

use super::load_config;
use clap::Args;
use discorator_core::config::Config;
use discorator_core::paths;
use serde_json::Value;
use std::path::Path;

/// Config command arguments.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(clap::Subcommand)]
pub enum ConfigCommand {
    /// Show configuration (token redacted)
    Show,

    /// Write a default configuration file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

/// The config as JSON with the token masked.
fn redacted(config: &Config) -> anyhow::Result<Value> {
    let mut json = serde_json::to_value(config)?;
    if let Some(token) = json.pointer_mut("/account/token") {
        *token = Value::String("[REDACTED]".to_string());
    }
    Ok(json)
}

/// Run the config command.
pub fn run(args: ConfigArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => paths::config_file()?,
    };

    match args.command {
        ConfigCommand::Show => {
            let config = load_config(config_path)?;
            println!("{}", serde_json::to_string_pretty(&redacted(&config)?)?);
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Config already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
        }

        ConfigCommand::Validate => {
            let config = load_config(config_path)?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}
