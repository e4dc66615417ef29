//! Session configuration
//!
//! Values the host application provides when it creates a session: which
//! service to advertise/discover, how the device presents itself, and how
//! long a quiz round lasts.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Length of a quiz round in seconds
pub const DEFAULT_ROUND_DURATION_SECS: u32 = 30;

/// Interval between round clock ticks
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("Invalid service id: must not be empty")]
    EmptyServiceId,

    #[error("Invalid round duration: must be > 0, got {0}")]
    InvalidRoundDuration(u32),

    #[error("Invalid tick interval: must be > 0 ms, got {0}")]
    InvalidTickInterval(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Devices connect only when they share this service id
    pub service_id: String,
    /// Identifier advertised alongside the service (the app's package name)
    pub app_identifier: String,
    /// Human readable name; empty lets the transport pick one
    pub endpoint_name: String,
    pub round_duration_secs: u32,
    pub tick_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_id: "quizmesh".to_string(),
            app_identifier: "org.quizmesh.app".to_string(),
            endpoint_name: String::new(),
            round_duration_secs: DEFAULT_ROUND_DURATION_SECS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_id.trim().is_empty() {
            return Err(ConfigError::EmptyServiceId);
        }
        if self.round_duration_secs == 0 {
            return Err(ConfigError::InvalidRoundDuration(self.round_duration_secs));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval(self.tick_interval_ms));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn app_identifiers(&self) -> Vec<String> {
        if self.app_identifier.is_empty() {
            Vec::new()
        } else {
            vec![self.app_identifier.clone()]
        }
    }
}
