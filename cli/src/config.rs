// Configuration management for the quizmesh CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/quizmesh/config.json
// - Linux: ~/.config/quizmesh/config.json
// - Windows: %APPDATA%\quizmesh\config.json

use anyhow::{Context, Result};
use quizmesh_core::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settings handed to every session node
    pub session: SessionConfig,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    /// Append logs to this file instead of stderr
    pub log_file: Option<String>,

    /// Simulation defaults
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of guests joining the host
    pub guests: usize,

    /// Chance that a simulated answer is correct
    pub accuracy: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            log_level: "warn".to_string(),
            log_file: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            guests: 3,
            accuracy: 0.6,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("quizmesh");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .session
                .validate()
                .context("Invalid session settings in config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Update one key in memory; the caller saves
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "service_id" => updated.session.service_id = value.to_string(),
            "app_identifier" => updated.session.app_identifier = value.to_string(),
            "endpoint_name" => updated.session.endpoint_name = value.to_string(),
            "round_duration_secs" => {
                updated.session.round_duration_secs =
                    value.parse().context("Invalid number of seconds")?;
            }
            "tick_interval_ms" => {
                updated.session.tick_interval_ms =
                    value.parse().context("Invalid number of milliseconds")?;
            }
            "log_level" => updated.log_level = value.to_string(),
            "log_file" => {
                updated.log_file = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "guests" => {
                updated.simulation.guests = value.parse().context("Invalid number")?;
            }
            "accuracy" => {
                let accuracy: f64 = value.parse().context("Invalid probability")?;
                if !(0.0..=1.0).contains(&accuracy) {
                    anyhow::bail!("accuracy must be between 0 and 1");
                }
                updated.simulation.accuracy = accuracy;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        updated
            .session
            .validate()
            .with_context(|| format!("Rejected {} = {}", key, value))?;
        *self = updated;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "service_id" => Some(self.session.service_id.clone()),
            "app_identifier" => Some(self.session.app_identifier.clone()),
            "endpoint_name" => Some(self.session.endpoint_name.clone()),
            "round_duration_secs" => Some(self.session.round_duration_secs.to_string()),
            "tick_interval_ms" => Some(self.session.tick_interval_ms.to_string()),
            "log_level" => Some(self.log_level.clone()),
            "log_file" => self.log_file.clone(),
            "guests" => Some(self.simulation.guests.to_string()),
            "accuracy" => Some(self.simulation.accuracy.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let endpoint_name = if self.session.endpoint_name.is_empty() {
            "(transport assigned)".to_string()
        } else {
            self.session.endpoint_name.clone()
        };
        vec![
            ("service_id".to_string(), self.session.service_id.clone()),
            ("app_identifier".to_string(), self.session.app_identifier.clone()),
            ("endpoint_name".to_string(), endpoint_name),
            (
                "round_duration_secs".to_string(),
                format!("{}s", self.session.round_duration_secs),
            ),
            (
                "tick_interval_ms".to_string(),
                format!("{}ms", self.session.tick_interval_ms),
            ),
            ("log_level".to_string(), self.log_level.clone()),
            (
                "log_file".to_string(),
                self.log_file.clone().unwrap_or_else(|| "(stderr)".to_string()),
            ),
            ("guests".to_string(), self.simulation.guests.to_string()),
            ("accuracy".to_string(), self.simulation.accuracy.to_string()),
        ]
    }
}
