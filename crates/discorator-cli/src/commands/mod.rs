//! CLI command implementations.

pub mod close_codes;
pub mod config;
pub mod connect;
pub mod intents;

use discorator_core::config::Config;
use std::path::Path;

/// Load the config from `path`, or from the default location if none was given.
///
/// A missing default file yields the built-in defaults; a missing explicit
/// file is an error.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    Ok(config)
}
