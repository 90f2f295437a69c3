//! # discorator-core
//!
//! Configuration, credentials, and intent types for Discorator.
//!
//! This crate provides shared functionality used by the gateway engine and the CLI:
//!
//! - **Configuration**: Loading, validation, and persistence of the JSON5 config file
//! - **Credentials**: The bearer token, normalized for the account type and zeroed on drop
//! - **Intents**: The bit field restricting which event categories the platform delivers

pub mod config;
pub mod error;
pub mod intents;
pub mod paths;
pub mod token;

// Re-exports for convenience
pub use config::Config;
pub use error::{ConfigError, Error, Result};
pub use intents::{Intent, Intents};
pub use token::{AccountType, Token};
