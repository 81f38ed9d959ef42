// SPDX-License-Identifier: GPL-3.0-only

//! Static engine configuration
//!
//! Loaded once at startup from JSON. Every field has a default, so a partial
//! file (or no file at all) is valid.

use crate::constants::{app_info, dispatch, monitor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Frame dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on concurrent frame workers
    pub max_workers: usize,
    /// Target per-frame processing time; slower modules get flagged
    pub frame_budget_ms: u64,
    /// Hard limit for a single `process` call (modules may override)
    pub process_timeout_ms: u64,
    /// Failures within `failure_window_ms` before a module is disabled
    pub failure_threshold: u32,
    pub failure_window_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_workers: dispatch::default_workers(),
            frame_budget_ms: dispatch::FRAME_BUDGET.as_millis() as u64,
            process_timeout_ms: dispatch::PROCESS_TIMEOUT.as_millis() as u64,
            failure_threshold: dispatch::FAILURE_THRESHOLD,
            failure_window_ms: dispatch::FAILURE_WINDOW.as_millis() as u64,
        }
    }
}

impl DispatchConfig {
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }
}

/// Resource monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sampling period, clamped to 1-10 s
    pub sample_interval_ms: u64,
    pub high_water_ratio: f64,
    pub low_water_ratio: f64,
    /// Worker pool size while shedding load
    pub shed_workers: usize,
    /// Disable modules whose P99 exceeds the frame budget
    pub auto_disable_slow: bool,
    /// Samples needed before a module's P99 counts
    pub min_latency_samples: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: monitor::SAMPLE_INTERVAL.as_millis() as u64,
            high_water_ratio: monitor::HIGH_WATER_RATIO,
            low_water_ratio: monitor::LOW_WATER_RATIO,
            shed_workers: monitor::SHED_WORKERS,
            auto_disable_slow: false,
            min_latency_samples: monitor::MIN_LATENCY_SAMPLES,
        }
    }
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
            .clamp(monitor::MIN_SAMPLE_INTERVAL, monitor::MAX_SAMPLE_INTERVAL)
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub dispatch: DispatchConfig,
    pub monitor: MonitorConfig,
    /// Known-good camera used when a bind fails
    pub fallback_camera_index: usize,
}

impl EngineConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(app_info::CONFIG_DIR).join(app_info::CONFIG_FILE))
    }

    /// Load configuration from `path`, or the default location when `None`
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => {
                    debug!("No config directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let config: Self = serde_json::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        config.validate()?;
        info!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.max_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch.max_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.dispatch.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch.failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        let m = &self.monitor;
        if !(0.0 < m.low_water_ratio && m.low_water_ratio <= m.high_water_ratio && m.high_water_ratio <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "monitor",
                reason: format!(
                    "water marks must satisfy 0 < low ({}) <= high ({}) <= 1",
                    m.low_water_ratio, m.high_water_ratio
                ),
            });
        }
        Ok(())
    }

    /// Builder-style override of the worker pool bound
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.dispatch.max_workers = max_workers.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_interval_is_clamped() {
        let mut monitor = MonitorConfig::default();
        monitor.sample_interval_ms = 50;
        assert_eq!(monitor.sample_interval(), Duration::from_secs(1));
        monitor.sample_interval_ms = 60_000;
        assert_eq!(monitor.sample_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_inverted_water_marks() {
        let mut config = EngineConfig::default();
        config.monitor.low_water_ratio = 0.9;
        config.monitor.high_water_ratio = 0.8;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }
}
