//! Player settings, persisted as JSON (`depthplay.json`).
//!
//! Every field has a default, so partial files and a missing file both work.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::scheduler::SchedulerConfig;
use crate::paths::{self, PathConfig};

pub const CONFIG_FILE: &str = "depthplay.json";

/// Playback core settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Frames read ahead per cache fill
    pub prefetch_window: usize,
    /// Background loader threads
    pub loader_threads: usize,
    /// Start playing as soon as the first frames are decoded
    pub autoplay: bool,
    pub scheduler: SchedulerConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            prefetch_window: 30,
            loader_threads: num_cpus::get().clamp(1, 2),
            autoplay: true,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Read `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from the resolved config directory
    pub fn load(paths: &PathConfig) -> Result<Self> {
        Self::load_from(&paths::config_file(CONFIG_FILE, paths))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, raw).with_context(|| format!("Failed to write config: {}", path.display()))?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PlayerConfig::load_from(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(config, PlayerConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{ "prefetch_window": 12, "scheduler": { "window": 4 } }"#).unwrap();

        let config = PlayerConfig::load_from(&path).unwrap();
        assert_eq!(config.prefetch_window, 12);
        assert_eq!(config.scheduler.window, 4);
        assert_eq!(config.scheduler.initial_period_ms, 33);
        assert!(config.autoplay);
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        let config = PlayerConfig {
            autoplay: false,
            loader_threads: 3,
            ..PlayerConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(PlayerConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(PlayerConfig::load_from(&path).is_err());
    }
}
