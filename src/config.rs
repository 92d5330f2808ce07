use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::model::WrapPolicy;
use crate::navigation::NavigationSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "tunequeue";
const CONFIG_FILE: &str = "engine.json";
const QUEUE_FILE: &str = "queue.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_restart_threshold_ms")]
    pub restart_threshold_ms: u64,
    #[serde(default)]
    pub wrap_policy: WrapPolicy,
    #[serde(default = "default_coalesce_interval_ms")]
    pub coalesce_interval_ms: u64,
    #[serde(default = "default_coalesce_max_delay_ms")]
    pub coalesce_max_delay_ms: u64,
    #[serde(default = "default_persist_max_attempts")]
    pub persist_max_attempts: u32,
    #[serde(default = "default_persist_backoff_ms")]
    pub persist_backoff_ms: u64,
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_restart_threshold_ms() -> u64 {
    3_000
}

fn default_coalesce_interval_ms() -> u64 {
    60
}

fn default_coalesce_max_delay_ms() -> u64 {
    300
}

fn default_persist_max_attempts() -> u32 {
    3
}

fn default_persist_backoff_ms() -> u64 {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            restart_threshold_ms: default_restart_threshold_ms(),
            wrap_policy: WrapPolicy::default(),
            coalesce_interval_ms: default_coalesce_interval_ms(),
            coalesce_max_delay_ms: default_coalesce_max_delay_ms(),
            persist_max_attempts: default_persist_max_attempts(),
            persist_backoff_ms: default_persist_backoff_ms(),
            shuffle_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn navigation(&self) -> NavigationSettings {
        NavigationSettings {
            history_limit: self.history_limit,
            restart_threshold: Duration::from_millis(self.restart_threshold_ms),
            wrap_policy: self.wrap_policy,
        }
    }

    pub fn coalesce_interval(&self) -> Duration {
        Duration::from_millis(self.coalesce_interval_ms)
    }

    pub fn coalesce_max_delay(&self) -> Duration {
        Duration::from_millis(self.coalesce_max_delay_ms.max(self.coalesce_interval_ms))
    }

    pub fn persist_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_ms)
    }
}

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("TUNEQUEUE_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("USERPROFILE")
        .or_else(|_| env::var("HOME"))
        .context("neither USERPROFILE nor HOME is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE))
}

pub fn queue_path() -> Result<PathBuf> {
    Ok(config_root()?.join(QUEUE_FILE))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

pub fn load_config() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: EngineConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

pub fn save_config(config: &EngineConfig) -> Result<()> {
    ensure_config_dir()?;
    let path = config_path()?;
    let json = serde_json::to_string_pretty(config)?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().expect("tempdir");
        unsafe {
            env::set_var("TUNEQUEUE_CONFIG_DIR", dir.path().to_string_lossy().as_ref());
        }

        let config = EngineConfig {
            wrap_policy: WrapPolicy::NaturalOrder,
            shuffle_seed: Some(17),
            ..EngineConfig::default()
        };
        save_config(&config).expect("save");
        let loaded = load_config().expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"history_limit": 5}"#).expect("parse");
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.restart_threshold_ms, 3_000);
        assert_eq!(config.wrap_policy, WrapPolicy::CurrentOrder);
        assert_eq!(config.navigation().restart_threshold, Duration::from_secs(3));
    }

    #[test]
    fn max_delay_never_shorter_than_interval() {
        let config = EngineConfig {
            coalesce_interval_ms: 500,
            coalesce_max_delay_ms: 100,
            ..EngineConfig::default()
        };
        assert_eq!(config.coalesce_max_delay(), Duration::from_millis(500));
    }
}
