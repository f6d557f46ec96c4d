//! ChatMacro configuration system.
//!
//! Scheduler triggers live here rather than in the macro store.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MacroError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub scheduler: TickConfig,
    #[serde(default)]
    pub schedulers: Vec<SchedulerConfig>,
}

fn default_database_path() -> String { "~/.chatmacro/macros.db".into() }

impl Default for MacroConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            executor: ExecutorConfig::default(),
            scheduler: TickConfig::default(),
            schedulers: Vec::new(),
        }
    }
}

impl MacroConfig {
    /// Load config from the default path (~/.chatmacro/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MacroError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MacroError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MacroError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the ChatMacro home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chatmacro")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }
}

/// Executor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Pause between two lines without a wait directive.
    #[serde(default = "default_message_interval_ms")]
    pub message_interval_ms: u64,
}

fn default_message_interval_ms() -> u64 { 60 }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { message_interval_ms: default_message_interval_ms() }
    }
}

/// Polling driver tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 { 1000 }

impl Default for TickConfig {
    fn default() -> Self {
        Self { tick_interval_ms: default_tick_interval_ms() }
    }
}

/// A named group of cron triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub name: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub triggers: Vec<SchedulerTriggerConfig>,
}

fn bool_true() -> bool { true }

/// One cron trigger: when `time_expression` matches in `time_zone`, send `command`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerTriggerConfig {
    /// IANA name (`Europe/Berlin`) or fixed offset (`UTC+2`, `+05:30`).
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    pub time_expression: String,
    /// Outbound text, not a macro lookup.
    #[serde(default)]
    pub command: String,
}

fn default_time_zone() -> String { "UTC".into() }

impl SchedulerTriggerConfig {
    pub fn new(time_zone: &str, time_expression: &str, command: &str) -> Self {
        Self {
            time_zone: time_zone.to_string(),
            time_expression: time_expression.to_string(),
            command: command.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: MacroConfig = toml::from_str(
            r#"
            [[schedulers]]
            name = "daily"

            [[schedulers.triggers]]
            time_expression = "0 8 * * *"
            command = "/echo good morning"
            "#,
        )
        .unwrap();
        assert_eq!(config.executor.message_interval_ms, 60);
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.schedulers.len(), 1);
        assert!(config.schedulers[0].enabled);
        assert_eq!(config.schedulers[0].triggers[0].time_zone, "UTC");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = MacroConfig::default();
        config.executor.message_interval_ms = 250;
        config.schedulers.push(SchedulerConfig {
            name: "raid".into(),
            enabled: false,
            triggers: vec![SchedulerTriggerConfig::new("UTC+2", "*/5 * * * *", "/p ready?")],
        });
        config.save_to(&path).unwrap();

        let loaded = MacroConfig::load_from(&path).unwrap();
        assert_eq!(loaded.executor.message_interval_ms, 250);
        assert!(!loaded.schedulers[0].enabled);
        assert_eq!(loaded.schedulers[0].triggers[0].command, "/p ready?");
    }

    #[test]
    fn test_load_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "database_path = [").unwrap();
        assert!(matches!(MacroConfig::load_from(&path), Err(MacroError::Config(_))));
    }
}
