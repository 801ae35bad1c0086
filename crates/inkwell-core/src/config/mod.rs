//! Runtime configuration for the autosave, sync, and history engines.
//!
//! Durations are expressed in milliseconds so the same struct can be loaded
//! from a JSON file shipped with the app or overlaid from `INKWELL_*`
//! environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ENV_DEBOUNCE_DELAY_MS: &str = "INKWELL_DEBOUNCE_DELAY_MS";
const ENV_MAX_RETRIES: &str = "INKWELL_SYNC_MAX_RETRIES";
const ENV_BASE_DELAY_MS: &str = "INKWELL_SYNC_BASE_DELAY_MS";
const ENV_FAILURE_THRESHOLD: &str = "INKWELL_SYNC_FAILURE_THRESHOLD";
const ENV_COOLDOWN_MS: &str = "INKWELL_SYNC_COOLDOWN_MS";
const ENV_CHUNK_SIZE_BYTES: &str = "INKWELL_SYNC_CHUNK_SIZE_BYTES";
const ENV_AUTO_SNAPSHOT_INTERVAL_MS: &str = "INKWELL_AUTO_SNAPSHOT_INTERVAL_MS";

/// Top-level configuration consumed at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub autosave: AutosaveConfig,
    pub sync: SyncConfig,
    pub history: HistoryConfig,
}

/// Autosave debounce settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AutosaveConfig {
    /// Quiet period after the last edit before the draft is written
    pub debounce_delay_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_delay_ms: 120,
        }
    }
}

impl AutosaveConfig {
    pub const fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }
}

/// Remote sync settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Hard cap on remote attempts for one queued draft
    pub max_retries: u32,
    /// Backoff before retry `n` is `base_delay * 2^n`
    pub base_delay_ms: u64,
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit short-circuits calls
    pub cooldown_ms: u64,
    /// Content larger than this is written as ordered chunks
    pub chunk_size_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            failure_threshold: 3,
            cooldown_ms: 30_000,
            chunk_size_bytes: 900 * 1024,
        }
    }
}

impl SyncConfig {
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Version-history settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    /// Minimum spacing between automatic (non-manual) snapshots
    pub auto_snapshot_interval_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            auto_snapshot_interval_ms: 30_000,
        }
    }
}

impl HistoryConfig {
    pub const fn auto_snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.auto_snapshot_interval_ms)
    }
}

impl Config {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `INKWELL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = parse_var(&lookup, ENV_DEBOUNCE_DELAY_MS)? {
            config.autosave.debounce_delay_ms = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_MAX_RETRIES)? {
            config.sync.max_retries = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_BASE_DELAY_MS)? {
            config.sync.base_delay_ms = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_FAILURE_THRESHOLD)? {
            config.sync.failure_threshold = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_COOLDOWN_MS)? {
            config.sync.cooldown_ms = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_CHUNK_SIZE_BYTES)? {
            config.sync.chunk_size_bytes = value;
        }
        if let Some(value) = parse_var(&lookup, ENV_AUTO_SNAPSHOT_INTERVAL_MS)? {
            config.history.auto_snapshot_interval_ms = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable a guarantee of the engines.
    pub fn validate(&self) -> Result<()> {
        if self.autosave.debounce_delay_ms == 0 {
            return Err(Error::Config("debounce_delay_ms must be positive".into()));
        }
        if self.sync.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.sync.failure_threshold == 0 {
            return Err(Error::Config("failure_threshold must be at least 1".into()));
        }
        if self.sync.chunk_size_bytes < 4 {
            // A chunk must be able to hold any single UTF-8 character.
            return Err(Error::Config("chunk_size_bytes must be at least 4".into()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = crate::util::normalize_text_option(lookup(key)) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} has invalid value '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.autosave.debounce_delay(), Duration::from_millis(120));
        assert_eq!(config.sync.max_retries, 3);
    }

    #[test]
    fn from_json_fills_missing_sections_with_defaults() {
        let config = Config::from_json(r#"{ "autosave": { "debounce_delay_ms": 50 } }"#).unwrap();
        assert_eq!(config.autosave.debounce_delay_ms, 50);
        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.history, HistoryConfig::default());
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        let error = Config::from_json(r#"{ "sync": { "max_retry": 2 } }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn from_json_rejects_zero_retries() {
        let error = Config::from_json(r#"{ "sync": { "max_retries": 0 } }"#).unwrap_err();
        assert!(error.to_string().contains("max_retries"));
    }

    #[test]
    fn lookup_overlays_defaults() {
        let vars = HashMap::from([
            (ENV_DEBOUNCE_DELAY_MS, "50"),
            (ENV_COOLDOWN_MS, " 5000 "),
            (ENV_MAX_RETRIES, ""),
        ]);
        let config =
            Config::from_lookup(|key| vars.get(key).map(|value| (*value).to_string())).unwrap();
        assert_eq!(config.autosave.debounce_delay_ms, 50);
        assert_eq!(config.sync.cooldown(), Duration::from_secs(5));
        assert_eq!(config.sync.max_retries, 3);
    }

    #[test]
    fn lookup_rejects_malformed_numbers() {
        let error = Config::from_lookup(|key| {
            (key == ENV_CHUNK_SIZE_BYTES).then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(error.to_string().contains(ENV_CHUNK_SIZE_BYTES));
    }
}
