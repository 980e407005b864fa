//! Sensor identity and tunables, read from a JSON file at startup.

use junction_core::config::ConfigError;
use junction_core::models::EdgeKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Noise is drawn uniformly from `[-magnitude, magnitude]`
    pub magnitude: u32,
    /// Chance of asserting priority when the engine reports none
    pub false_priority_probability: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            magnitude: 2,
            false_priority_probability: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub cluster_id: u32,
    /// Edge this sensor is installed on, for diagnostics only
    #[serde(default)]
    pub edge: Option<EdgeKey>,
    #[serde(default)]
    pub noisy: bool,
    #[serde(default = "default_sim_url")]
    pub sim_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_bind_attempts")]
    pub bind_attempts: u32,
    #[serde(default = "default_bind_retry_ms")]
    pub bind_retry_ms: u64,
}

fn default_sim_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:5001".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_connection_timeout_ms() -> u64 {
    5_000
}

fn default_bind_attempts() -> u32 {
    10
}

fn default_bind_retry_ms() -> u64 {
    1_000
}

impl SensorConfig {
    pub fn new(cluster_id: u32) -> Self {
        Self {
            cluster_id,
            edge: None,
            noisy: false,
            sim_url: default_sim_url(),
            listen_addr: default_listen_addr(),
            noise: NoiseConfig::default(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            bind_attempts: default_bind_attempts(),
            bind_retry_ms: default_bind_retry_ms(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.bind_attempts == 0 {
            return Err(ConfigError::Invalid("bind_attempts must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.noise.false_priority_probability) {
            return Err(ConfigError::Invalid(
                "noise.false_priority_probability must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn bind_retry(&self) -> Duration {
        Duration::from_millis(self.bind_retry_ms)
    }
}
