//! Bearer token handling with memory protection.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Prefix the platform expects in front of bot tokens.
const BOT_PREFIX: &str = "Bot ";

/// The kind of account a token belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Bot,
    User,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bot => f.write_str("bot"),
            Self::User => f.write_str("user"),
        }
    }
}

/// The bearer credential presented in IDENTIFY and RESUME frames.
///
/// Zeroed on drop and never printed. A session takes its token once at
/// construction; there is no way to swap it afterwards.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Token {
    inner: String,
}

impl Token {
    /// Wrap a raw token exactly as given.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Normalize a raw token for the given account type.
    ///
    /// Bot tokens are prefixed with `Bot ` unless they already carry it.
    pub fn for_account(account: AccountType, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        match account {
            AccountType::Bot if !trimmed.starts_with(BOT_PREFIX) => {
                Self::new(format!("{}{}", BOT_PREFIX, trimmed))
            }
            _ => Self::new(trimmed),
        }
    }

    /// Expose the token value.
    ///
    /// Only frame construction should need this.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    /// Check if the token is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.trim().is_empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token([REDACTED])")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(self.inner.as_bytes(), other.inner.as_bytes())
    }
}

impl Eq for Token {}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s))
    }
}

impl Serialize for Token {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Written back verbatim so config files round-trip
        self.inner.serialize(serializer)
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
