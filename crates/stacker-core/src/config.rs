//! Configuration for Flex Stacker modules.
//!
//! Configuration is layered with Figment:
//!
//! 1. Built-in defaults
//! 2. A TOML file
//! 3. `FLEX_STACKER_`-prefixed environment variables (nested keys split on `__`)
//!
//! # Example
//!
//! ```toml
//! labware_definitions_dir = "/data/labware"
//!
//! [[modules]]
//! module_id = "flexStackerModuleV1-D4"
//! slot = "D4"
//!
//! [modules.connection]
//! port = "/dev/ot_module_flexstacker0"
//! simulating = false
//! poll_interval_ms = 2000
//! ```

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Telemetry polls this many times faster when simulating.
pub const SIMULATED_POLL_SPEEDUP: u32 = 50;

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Serial connection settings for one stacker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackerConfig {
    /// Serial port path (e.g., "/dev/ot_module_flexstacker0")
    pub port: String,
    pub baud_rate: u32,
    /// Timeout for non-motion responses.
    pub response_timeout_ms: u64,
    /// Timeout for motion responses, which only arrive once the move ends.
    pub motion_timeout_ms: u64,
    /// Use the simulating driver instead of a real port.
    pub simulating: bool,
    /// Telemetry poll interval on real hardware.
    pub poll_interval_ms: u64,
}

impl Default for StackerConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ot_module_flexstacker0".to_string(),
            baud_rate: 115_200,
            response_timeout_ms: 1_000,
            motion_timeout_ms: 60_000,
            simulating: false,
            poll_interval_ms: 2_000,
        }
    }
}

impl StackerConfig {
    /// Config for a simulated stacker with default timings.
    pub fn simulated() -> Self {
        Self {
            simulating: true,
            ..Self::default()
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn motion_timeout(&self) -> Duration {
        Duration::from_millis(self.motion_timeout_ms)
    }

    /// Effective poll interval, shortened when simulating.
    pub fn poll_interval(&self) -> Duration {
        let base = Duration::from_millis(self.poll_interval_ms);
        if self.simulating {
            base / SIMULATED_POLL_SPEEDUP
        } else {
            base
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !self.simulating && self.port.trim().is_empty() {
            return Err("port must be set unless simulating".into());
        }
        if self.baud_rate == 0 {
            return Err("baud_rate must be positive".into());
        }
        if self.response_timeout_ms == 0 || self.motion_timeout_ms == 0 {
            return Err("timeouts must be positive".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be positive".into());
        }
        Ok(())
    }
}

/// One stacker module as loaded into a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackerModuleConfig {
    pub module_id: String,
    /// Deck slot name used in user-facing messages (e.g., "D4").
    pub slot: String,
    #[serde(default)]
    pub connection: StackerConfig,
}

/// Top-level configuration for the stacker system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackerSystemConfig {
    pub modules: Vec<StackerModuleConfig>,
    /// Root of `<namespace>/<load_name>/<version>.json` labware definitions.
    pub labware_definitions_dir: Option<PathBuf>,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
}

impl Default for StackerSystemConfig {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            labware_definitions_dir: None,
            log_filter: "info".to_string(),
        }
    }
}

impl StackerSystemConfig {
    /// Semantic checks that pass parsing but are logically wrong.
    pub fn validate(&self) -> std::result::Result<(), ConfigLoadError> {
        let mut seen = HashSet::new();
        for module in &self.modules {
            if module.module_id.trim().is_empty() {
                return Err(ConfigLoadError::ValidationError(
                    "module_id must not be empty".into(),
                ));
            }
            if !seen.insert(module.module_id.as_str()) {
                return Err(ConfigLoadError::ValidationError(format!(
                    "duplicate module_id '{}'",
                    module.module_id
                )));
            }
            module.connection.validate().map_err(|e| {
                ConfigLoadError::ValidationError(format!("module '{}': {}", module.module_id, e))
            })?;
        }
        Ok(())
    }
}

/// Load configuration from a TOML file, with environment overrides.
pub fn load_config(path: &Path) -> Result<StackerSystemConfig> {
    if !path.exists() {
        return Err(ConfigLoadError::NotFound(path.display().to_string()).into());
    }

    debug!("Loading Flex Stacker config from: {}", path.display());

    let config: StackerSystemConfig = Figment::new()
        .merge(Serialized::defaults(StackerSystemConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FLEX_STACKER_").split("__"))
        .extract()
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    config.validate()?;

    info!(modules = config.modules.len(), "Loaded Flex Stacker config");
    Ok(config)
}
