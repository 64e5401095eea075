//! Configuration resolution for Forgeflow.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (forgeflow.toml)
//! 3. Environment variables (`FORGEFLOW_*`, highest priority)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete Forgeflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub quality: QualityConfig,
}

/// Daemon process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    pub log_level: String,
    pub log_json: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Service supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    /// Processed-event count that triggers a checkpoint.
    pub checkpoint_after_events: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            checkpoint_after_events: 300,
        }
    }
}

/// Decision engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Log length that triggers a checkpoint re-entry.
    pub max_events_before_checkpoint: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events_before_checkpoint: 100,
        }
    }
}

/// Build pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Interval between parent-artifact polls (seconds).
    pub parent_poll_interval_secs: u64,
    /// Hard ceiling on the total parent wait (seconds).
    pub parent_wait_ceiling_secs: u64,
    /// Bounded-retry attempts for external calls.
    pub activity_max_attempts: u32,
    /// Hard per-call timeout for external calls (seconds).
    pub activity_timeout_secs: u64,
    /// Backoff cap between retry attempts (seconds).
    pub activity_backoff_cap_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parent_poll_interval_secs: 60,
            parent_wait_ceiling_secs: 30 * 60,
            activity_max_attempts: 3,
            activity_timeout_secs: 120,
            activity_backoff_cap_secs: 300,
        }
    }
}

impl PipelineConfig {
    pub const fn parent_poll_interval(&self) -> Duration {
        Duration::from_secs(self.parent_poll_interval_secs)
    }

    pub const fn parent_wait_ceiling(&self) -> Duration {
        Duration::from_secs(self.parent_wait_ceiling_secs)
    }

    pub const fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_secs)
    }

    pub const fn activity_backoff_cap(&self) -> Duration {
        Duration::from_secs(self.activity_backoff_cap_secs)
    }
}

/// Quality gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityConfig {
    /// Maximum remediation rounds before giving up.
    pub max_attempts: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl Config {
    /// Load configuration: defaults, then the optional TOML file, then
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_toml_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a TOML config file. Missing sections fall back to defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Apply `FORGEFLOW_*` environment overrides on top of current values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FORGEFLOW_LOG_LEVEL") {
            self.daemon.log_level = level;
        }
        if let Ok(raw) = std::env::var("FORGEFLOW_LOG_JSON") {
            self.daemon.log_json = matches!(raw.as_str(), "1" | "true" | "yes");
        }
        if let Ok(raw) = std::env::var("FORGEFLOW_CHECKPOINT_AFTER_EVENTS")
            && let Ok(n) = raw.parse()
        {
            self.supervisor.checkpoint_after_events = n;
        }
        if let Ok(raw) = std::env::var("FORGEFLOW_QUALITY_MAX_ATTEMPTS")
            && let Ok(n) = raw.parse()
        {
            self.quality.max_attempts = n;
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.supervisor.checkpoint_after_events, 300);
        assert_eq!(config.engine.max_events_before_checkpoint, 100);
        assert_eq!(config.pipeline.parent_wait_ceiling_secs, 1800);
        assert_eq!(config.quality.max_attempts, 3);
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn partial_toml_keeps_default_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[quality]\nmax_attempts = 5\n\n[pipeline]\nparent_poll_interval_secs = 10\n\
             parent_wait_ceiling_secs = 60\nactivity_max_attempts = 2\n\
             activity_timeout_secs = 5\nactivity_backoff_cap_secs = 20"
        )
        .unwrap();

        let config = Config::from_toml_file(file.path()).unwrap();
        assert_eq!(config.quality.max_attempts, 5);
        assert_eq!(config.pipeline.parent_poll_interval_secs, 10);
        // Untouched sections keep defaults
        assert_eq!(config.supervisor.checkpoint_after_events, 300);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [[[").unwrap();
        let err = Config::from_toml_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[allow(unsafe_code)] // std::env::set_var is unsafe in edition 2024
    fn env_overrides_win_over_defaults_and_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[quality]\nmax_attempts = 5").unwrap();

        // These variable names are owned by this test alone.
        unsafe {
            std::env::set_var("FORGEFLOW_LOG_LEVEL", "trace");
            std::env::set_var("FORGEFLOW_QUALITY_MAX_ATTEMPTS", "7");
            std::env::set_var("FORGEFLOW_CHECKPOINT_AFTER_EVENTS", "not-a-number");
        }
        let config = Config::load(Some(file.path()));
        unsafe {
            std::env::remove_var("FORGEFLOW_LOG_LEVEL");
            std::env::remove_var("FORGEFLOW_QUALITY_MAX_ATTEMPTS");
            std::env::remove_var("FORGEFLOW_CHECKPOINT_AFTER_EVENTS");
        }

        let config = config.unwrap();
        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(config.quality.max_attempts, 7, "env beats the file value");
        // Unparseable overrides keep the lower-layer value.
        assert_eq!(config.supervisor.checkpoint_after_events, 300);
    }

    #[test]
    fn duration_helpers_convert_seconds() {
        let pipeline = PipelineConfig::default();
        assert_eq!(pipeline.parent_poll_interval(), Duration::from_secs(60));
        assert_eq!(pipeline.parent_wait_ceiling(), Duration::from_secs(1800));
    }
}
