//! Scanner configuration
//!
//! One TOML file configures the whole core: rate-limit admission,
//! timeout defaults, the audit logger, and the plugin directories.
//! Every section falls back to the engine defaults when omitted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vulnscan_common::error::{CommonError, CommonResult};
use vulnscan_common::resilience::{RateLimitConfig, TimeoutConfig};

use crate::security::audit::AuditConfig;

/// Rate-limit admission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Maximum tokens per bucket.
    pub capacity: f64,
    /// Token refill rate per second.
    pub rate: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { capacity: 100.0, rate: 10.0 }
    }
}

/// Timeout defaults, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Connection timeout.
    pub connect_secs: u64,
    /// Read timeout.
    pub read_secs: u64,
    /// Total operation deadline.
    pub total_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self { connect_secs: 10, read_secs: 30, total_secs: 60 }
    }
}

/// Plugin directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Directory of vulnerability plugin manifests.
    pub vuln_dir: PathBuf,
    /// Directory of tool plugin manifests.
    pub tool_dir: PathBuf,
    /// Whether to start the hot-reload watcher.
    pub watch: bool,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            vuln_dir: PathBuf::from("plugins/vulns"),
            tool_dir: PathBuf::from("plugins/tools"),
            watch: false,
        }
    }
}

/// Top-level scanner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Rate-limit admission settings.
    pub rate_limit: RateLimitSettings,
    /// Timeout defaults.
    pub timeouts: TimeoutSettings,
    /// Audit logger settings.
    pub audit: AuditConfig,
    /// Plugin directories.
    pub plugins: PluginSettings,
}

impl ScannerConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> CommonResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| CommonError::serialization("TOML", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk.
    pub fn load(path: &Path) -> CommonResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CommonError::persistence("read config", e.to_string()))?;
        Self::from_toml(&text)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CommonResult<()> {
        self.rate_limit_config()
            .validate()
            .map_err(|e| CommonError::config(e.to_string()))?;
        if self.timeouts.total_secs == 0 {
            return Err(CommonError::config("timeouts.total_secs must be greater than 0"));
        }
        if self.audit.max_files == 0 {
            return Err(CommonError::config("audit.max_files must be greater than 0"));
        }
        Ok(())
    }

    /// The rate-limit configuration for the control plane.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig { capacity: self.rate_limit.capacity, rate: self.rate_limit.rate }
    }

    /// The timeout configuration for the control plane.
    pub fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig {
            connect: Duration::from_secs(self.timeouts.connect_secs),
            read: Duration::from_secs(self.timeouts.read_secs),
            total: Duration::from_secs(self.timeouts.total_secs),
        }
    }
}
