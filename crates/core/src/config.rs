//! Engine configuration
//!
//! Stored as TOML. Every key is optional; missing keys take their defaults:
//!
//! ```toml
//! update_delay_ms = 300
//! refresh_timeout_secs = 60
//! freeze_poll_interval_ms = 500
//! max_heavy_backoffs = 20
//! default_list_name = "Default"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for dirty tracking, scheduling and reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Debounce delay between a schedule request and the pass (default: 300ms)
    pub update_delay_ms: u64,

    /// Bound for blocking "wait until refreshed" calls (default: 60s)
    pub refresh_timeout_secs: u64,

    /// How often a blocked `freeze` re-checks its caller's cancellation (default: 500ms)
    pub freeze_poll_interval_ms: u64,

    /// Consecutive heavy-operation deferrals before a pass runs anyway
    /// (default: 20, 0 = defer for as long as the operation lasts)
    pub max_heavy_backoffs: u32,

    /// Name of the change list created at startup
    pub default_list_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            update_delay_ms: 300,
            refresh_timeout_secs: 60,
            freeze_poll_interval_ms: 500,
            max_heavy_backoffs: 20,
            default_list_name: "Default".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        std::fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Render configuration as TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Check every value against its valid range
    pub fn validate(&self) -> Result<()> {
        check_range("update_delay_ms", self.update_delay_ms, 1, 60_000)?;
        check_range("refresh_timeout_secs", self.refresh_timeout_secs, 1, 3600)?;
        check_range("freeze_poll_interval_ms", self.freeze_poll_interval_ms, 10, 10_000)?;

        if self.default_list_name.trim().is_empty() {
            anyhow::bail!("Invalid value for default_list_name: must not be empty");
        }
        Ok(())
    }

    /// Debounce delay
    pub fn update_delay(&self) -> Duration {
        Duration::from_millis(self.update_delay_ms)
    }

    /// Bound for blocking refresh waits
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Poll interval for blocked `freeze` callers
    pub fn freeze_poll_interval(&self) -> Duration {
        Duration::from_millis(self.freeze_poll_interval_ms)
    }
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        anyhow::bail!(
            "Invalid value for {}: {} (valid range: {}-{})",
            key,
            value,
            min,
            max
        );
    }
    Ok(())
}
