//! Configuration schema definitions.

use crate::error::ConfigError;
use crate::intents::Intents;
use crate::token::{AccountType, Token};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default gateway entry address.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Main Discorator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Account credentials.
    #[serde(default)]
    pub account: AccountConfig,

    /// Gateway connection settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Heartbeat settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Reconnection policy settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Account section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Whether the token belongs to a bot or a user account.
    #[serde(default)]
    pub user_type: AccountType,

    /// Bearer token. Usually supplied through the environment instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
}

impl AccountConfig {
    /// The configured token normalized for the account type.
    pub fn resolved_token(&self) -> Option<Token> {
        self.token
            .as_ref()
            .filter(|t| !t.is_empty())
            .map(|t| Token::for_account(self.user_type, t.expose()))
    }
}

/// Gateway connection section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Entry address used for fresh connections.
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Intents declared in IDENTIFY.
    #[serde(default)]
    pub intents: Intents,

    /// Connection properties declared in IDENTIFY.
    #[serde(default)]
    pub properties: ConnectionProperties,

    /// Seconds to wait for HELLO and for the handshake to complete.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Log socket lifecycle at info level instead of debug.
    #[serde(default)]
    pub verbose: bool,

    /// Don't warn when a handler is registered for an event the intents never deliver.
    #[serde(default)]
    pub suppress_intent_warnings: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            intents: Intents::default(),
            properties: ConnectionProperties::default(),
            handshake_timeout_secs: default_handshake_timeout(),
            verbose: false,
            suppress_intent_warnings: false,
        }
    }
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_handshake_timeout() -> u64 {
    30
}

/// Client properties sent in IDENTIFY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "discorator".to_string(),
            device: "discorator".to_string(),
        }
    }
}

/// Heartbeat section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Treat a heartbeat that is still unacknowledged at the next beat as a dead connection.
    #[serde(default = "default_true")]
    pub require_ack: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { require_ack: true }
    }
}

fn default_true() -> bool {
    true
}

/// Reconnection policy section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Whether close codes missing from the table are resumed.
    #[serde(default = "default_true")]
    pub unknown_codes_recoverable: bool,

    /// Per-code overrides on top of the built-in table, keyed by the code as a string.
    #[serde(default)]
    pub close_codes: BTreeMap<String, CloseCodeRule>,

    /// Delay between consecutive automatic reconnects.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            unknown_codes_recoverable: true,
            close_codes: BTreeMap::new(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ReconnectConfig {
    /// The close-code overrides with their keys parsed.
    pub fn close_code_overrides(&self) -> Result<Vec<(u16, CloseCodeRule)>, ConfigError> {
        self.close_codes
            .iter()
            .map(|(code, rule)| {
                code.trim()
                    .parse::<u16>()
                    .map(|code| (code, rule.clone()))
                    .map_err(|_| ConfigError::Validation(format!("Invalid close code '{}'", code)))
            })
            .collect()
    }
}

/// One entry of the close-code table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseCodeRule {
    pub recoverable: bool,
    pub reason: String,
}

/// Backoff applied to automatic reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the second consecutive reconnect, in milliseconds.
    #[serde(default = "default_backoff_base")]
    pub base_ms: u64,

    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,

    /// Randomization applied as +/- this fraction of the delay.
    #[serde(default = "default_backoff_jitter")]
    pub jitter: f64,

    /// Consecutive reconnects allowed before giving up. 0 means unlimited.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base(),
            max_ms: default_backoff_max(),
            factor: default_backoff_factor(),
            jitter: default_backoff_jitter(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    60_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_backoff_jitter() -> f64 {
    0.1
}

fn default_max_attempts() -> u32 {
    10
}
