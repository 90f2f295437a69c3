//! Close-code classification.
//!
//! Every close, whether sent by the remote or synthesized locally, passes
//! through [`ClosePolicy::classify`] before the orchestrator decides to
//! resume or give up.

use discorator_core::config::ReconnectConfig;
use discorator_core::ConfigError;
use std::collections::HashMap;

/// Close codes with special meaning to the engine.
pub mod codes {
    /// Normal closure. Sent when the caller invalidates the session.
    pub const NORMAL: u16 = 1000;
    /// Sent when closing a connection that should stay resumable.
    pub const SERVICE_RESTART: u16 = 1012;
    /// Used when the remote asks us to reconnect (opcode 7).
    pub const RECONNECT_REQUESTED: u16 = 4000;
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    /// Used when the remote invalidates the session (opcode 9).
    pub const SESSION_TIMED_OUT: u16 = 4009;
    /// Used when a heartbeat went unacknowledged.
    pub const HEARTBEAT_TIMEOUT: u16 = 4900;
}

/// One row of the close-code table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRule {
    pub recoverable: bool,
    pub reason: String,
}

impl CloseRule {
    fn new(recoverable: bool, reason: impl Into<String>) -> Self {
        Self {
            recoverable,
            reason: reason.into(),
        }
    }
}

/// Outcome of classifying a close code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub recoverable: bool,
    pub reason: String,
}

/// Maps close codes to recoverable / non-recoverable.
#[derive(Debug, Clone)]
pub struct ClosePolicy {
    rules: HashMap<u16, CloseRule>,
    unknown_recoverable: bool,
}

const DEFAULT_TABLE: &[(u16, bool, &str)] = &[
    (1000, true, "Normal closure"),
    (1001, true, "Going away"),
    (1005, true, "No status received"),
    (1006, true, "Abnormal closure"),
    (1012, true, "Service restart"),
    (4000, true, "Unknown error"),
    (4001, true, "Unknown opcode"),
    (4002, true, "Decode error"),
    (4003, true, "Not authenticated"),
    (4004, false, "Authentication failed"),
    (4005, true, "Already authenticated"),
    (4007, true, "Invalid sequence"),
    (4008, true, "Rate limited"),
    (4009, true, "Session timed out"),
    (4010, false, "Invalid shard"),
    (4011, false, "Sharding required"),
    (4012, false, "Invalid API version"),
    (4013, false, "Invalid intent(s)"),
    (4014, false, "Disallowed intent(s)"),
    (4900, true, "Heartbeat ACK not received"),
];

impl Default for ClosePolicy {
    fn default() -> Self {
        let rules = DEFAULT_TABLE
            .iter()
            .map(|&(code, recoverable, reason)| (code, CloseRule::new(recoverable, reason)))
            .collect();
        Self {
            rules,
            unknown_recoverable: true,
        }
    }
}

impl ClosePolicy {
    /// The built-in table with configured overrides applied.
    pub fn from_config(config: &ReconnectConfig) -> Result<Self, ConfigError> {
        let mut policy = Self::default().unknown_recoverable(config.unknown_codes_recoverable);
        for (code, rule) in config.close_code_overrides()? {
            policy.set_rule(code, rule.recoverable, rule.reason);
        }
        Ok(policy)
    }

    /// Set how codes missing from the table are treated.
    pub fn unknown_recoverable(mut self, recoverable: bool) -> Self {
        self.unknown_recoverable = recoverable;
        self
    }

    /// Whether codes missing from the table are recoverable.
    pub fn unknown_is_recoverable(&self) -> bool {
        self.unknown_recoverable
    }

    /// Add or replace a rule.
    pub fn set_rule(&mut self, code: u16, recoverable: bool, reason: impl Into<String>) {
        self.rules.insert(code, CloseRule::new(recoverable, reason));
    }

    /// Builder form of [`set_rule`](Self::set_rule).
    pub fn with_rule(mut self, code: u16, recoverable: bool, reason: impl Into<String>) -> Self {
        self.set_rule(code, recoverable, reason);
        self
    }

    /// Classify a close code.
    pub fn classify(&self, code: u16) -> CloseEvent {
        match self.rules.get(&code) {
            Some(rule) => CloseEvent {
                code,
                recoverable: rule.recoverable,
                reason: rule.reason.clone(),
            },
            None => CloseEvent {
                code,
                recoverable: self.unknown_recoverable,
                reason: format!("Unknown close code {}", code),
            },
        }
    }

    /// All rules, ordered by code.
    pub fn rules(&self) -> Vec<(u16, &CloseRule)> {
        let mut rules: Vec<_> = self.rules.iter().map(|(code, rule)| (*code, rule)).collect();
        rules.sort_by_key(|(code, _)| *code);
        rules
    }
}
