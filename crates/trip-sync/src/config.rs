// File: trip-sync/src/config.rs
// Purpose: Configuration parsing from trip-sync.toml, with environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "trip-sync.toml";

/// Sync runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub sync: SyncSection,
}

/// Local durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// `sqlite://path.db` or `memory`
    #[serde(default = "default_local_url")]
    pub url: String,
}

/// Remote data store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// `sqlite://path.db` or `memory`
    #[serde(default = "default_remote_url")]
    pub url: String,

    /// Transport timeout for every remote call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Reconnect and notification behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_true")]
    pub drain_on_start: bool,

    /// Buffer size of the sync event channel
    #[serde(default = "default_notify_capacity")]
    pub notify_capacity: usize,
}

fn default_local_url() -> String {
    "sqlite://trip-sync.db".to_string()
}

fn default_remote_url() -> String {
    "sqlite://trip-remote.db".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_notify_capacity() -> usize {
    64
}

fn default_true() -> bool {
    true
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            url: default_local_url(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: default_remote_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            drain_on_start: default_true(),
            notify_capacity: default_notify_capacity(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load trip-sync.toml from the working directory, or defaults if absent.
    /// Environment overrides are applied either way.
    pub fn load_default() -> Result<Self> {
        let mut config = if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::load(DEFAULT_CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// TRIP_SYNC_LOCAL_URL, TRIP_SYNC_REMOTE_URL and TRIP_SYNC_TIMEOUT_MS
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TRIP_SYNC_LOCAL_URL") {
            self.local.url = url;
        }
        if let Some(url) = lookup("TRIP_SYNC_REMOTE_URL") {
            self.remote.url = url;
        }
        if let Some(ms) = lookup("TRIP_SYNC_TIMEOUT_MS") {
            self.remote.timeout_ms = ms
                .parse()
                .with_context(|| format!("TRIP_SYNC_TIMEOUT_MS is not a number: {}", ms))?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.remote.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = SyncConfig::from_toml("").unwrap();

        assert_eq!(config.local.url, "sqlite://trip-sync.db");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert!(config.sync.drain_on_start);
    }

    #[test]
    fn test_partial_sections() {
        let config = SyncConfig::from_toml(
            r#"
            [remote]
            url = "memory"
            timeout_ms = 250

            [sync]
            drain_on_start = false
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.url, "memory");
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert!(!config.sync.drain_on_start);
        assert_eq!(config.sync.notify_capacity, 64);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("TRIP_SYNC_LOCAL_URL", "memory"),
            ("TRIP_SYNC_TIMEOUT_MS", "42"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.local.url, "memory");
        assert_eq!(config.remote.timeout_ms, 42);
        assert_eq!(config.remote.url, "sqlite://trip-remote.db");
    }

    #[test]
    fn test_bad_timeout_override() {
        let mut config = SyncConfig::default();
        let result = config.apply_overrides(|name| {
            (name == "TRIP_SYNC_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }
}
