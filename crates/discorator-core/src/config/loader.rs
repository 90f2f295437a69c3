//! Configuration loading and persistence.

use super::Config;
use crate::error::ConfigError;
use crate::paths;
use std::fs;
use std::path::Path;
use url::Url;

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load from the default path, falling back to defaults if no file exists.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::load_default() {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(path)) => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 has no serializer; plain JSON is valid JSON5
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        // 1. Gateway entry address must be a ws:// or wss:// URL
        if self.gateway.url.trim().is_empty() {
            errors.push("Gateway url cannot be empty".to_string());
        } else {
            match Url::parse(&self.gateway.url) {
                Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
                Ok(url) => errors.push(format!(
                    "Gateway url must use ws or wss, got '{}'",
                    url.scheme()
                )),
                Err(e) => errors.push(format!("Invalid gateway url '{}': {}", self.gateway.url, e)),
            }
        }

        // 2. Intents
        if self.gateway.intents.is_empty() {
            errors.push("At least one intent must be enabled".to_string());
        }

        // 3. Handshake timeout
        if self.gateway.handshake_timeout_secs == 0 {
            errors.push("Handshake timeout must be greater than 0".to_string());
        }

        // 4. Backoff
        let backoff = &self.reconnect.backoff;
        if backoff.max_ms < backoff.base_ms {
            errors.push(format!(
                "Backoff max_ms ({}) is smaller than base_ms ({})",
                backoff.max_ms, backoff.base_ms
            ));
        }
        if !backoff.factor.is_finite() || backoff.factor < 1.0 {
            errors.push(format!("Backoff factor must be a finite number of at least 1.0, got {}", backoff.factor));
        }
        if !(0.0..=1.0).contains(&backoff.jitter) {
            errors.push(format!("Backoff jitter must be within 0.0-1.0, got {}", backoff.jitter));
        }

        // 5. Close-code overrides need a reason to surface
        for (code, rule) in &self.reconnect.close_codes {
            if code.trim().parse::<u16>().is_err() {
                errors.push(format!("Invalid close code '{}'", code));
            }
            if rule.reason.trim().is_empty() {
                errors.push(format!("Close code {} has an empty reason", code));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}
