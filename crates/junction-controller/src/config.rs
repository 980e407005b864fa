//! Controller configuration file.

use junction_core::config::ConfigError;
use junction_core::models::{EdgeKey, NodeId, SensorProfile};
use junction_core::trust::TrustRules;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// One sensor watching an approach to this controller's node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorAssignment {
    pub edge: EdgeKey,
    pub profile: SensorProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub node_id: NodeId,
    #[serde(default = "default_sim_url")]
    pub sim_url: String,
    pub sensors: Vec<SensorAssignment>,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    /// Stop after the current cycle once this file exists
    #[serde(default)]
    pub ending_marker: Option<PathBuf>,
    #[serde(default = "default_evaluation_interval_ms")]
    pub evaluation_interval_ms: u64,
    #[serde(default = "default_sensor_timeout_ms")]
    pub sensor_timeout_ms: u64,
    #[serde(default = "default_sim_timeout_ms")]
    pub sim_timeout_ms: u64,
    #[serde(default = "default_report_every_cycles")]
    pub report_every_cycles: u64,
    #[serde(default)]
    pub trust: TrustRules,
}

fn default_sim_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("/shared/reports")
}

fn default_evaluation_interval_ms() -> u64 {
    5_000
}

fn default_sensor_timeout_ms() -> u64 {
    1_500
}

fn default_sim_timeout_ms() -> u64 {
    3_000
}

fn default_report_every_cycles() -> u64 {
    10
}

impl ControllerConfig {
    pub fn new(node_id: NodeId, sensors: Vec<SensorAssignment>) -> Self {
        Self {
            node_id,
            sim_url: default_sim_url(),
            sensors,
            report_dir: default_report_dir(),
            ending_marker: None,
            evaluation_interval_ms: default_evaluation_interval_ms(),
            sensor_timeout_ms: default_sensor_timeout_ms(),
            sim_timeout_ms: default_sim_timeout_ms(),
            report_every_cycles: default_report_every_cycles(),
            trust: TrustRules::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if sensor.profile.address.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "sensor on edge {} has no address",
                    sensor.edge
                )));
            }
            if !seen.insert(sensor.profile.address.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "sensor address {} listed twice",
                    sensor.profile.address
                )));
            }
            if !sensor.edge.contains(self.node_id) {
                tracing::warn!(
                    "Sensor {} watches edge {}, which does not touch node {}",
                    sensor.profile.address,
                    sensor.edge,
                    self.node_id
                );
            }
        }
        if self.evaluation_interval_ms == 0 || self.report_every_cycles == 0 {
            return Err(ConfigError::Invalid(
                "evaluation_interval_ms and report_every_cycles must be positive".into(),
            ));
        }
        let rules = &self.trust;
        if !(0.0..=1.0).contains(&rules.alpha) {
            return Err(ConfigError::Invalid("trust.alpha must be within [0, 1]".into()));
        }
        if rules.trust_floor > rules.trust_ceiling {
            return Err(ConfigError::Invalid("trust floor above ceiling".into()));
        }
        if rules.max_peer_z <= 0.0 || rules.max_passage_deviation <= 0.0 {
            return Err(ConfigError::Invalid("fuzzy universes must be non-empty".into()));
        }
        Ok(())
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn sim_timeout(&self) -> Duration {
        Duration::from_millis(self.sim_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "node_id": 2,
        "sensors": [
            {"edge": "1-2", "profile": {"address": "10.0.0.1:5001", "initial_trust": 80}},
            {"edge": "2-3", "profile": {"address": "10.0.0.2:5001", "predicted_reliability": 40}}
        ],
        "trust": {"alpha": 0.5}
    }"#;

    #[test]
    fn parses_with_defaults() {
        let config: ControllerConfig = serde_json::from_str(CONFIG).unwrap();
        assert_eq!(config.node_id, 2);
        assert_eq!(config.sensors.len(), 2);
        assert_eq!(config.sensors[0].edge, EdgeKey::new(1, 2));
        assert_eq!(config.sensors[0].profile.initial_trust, 80.0);
        assert_eq!(config.sensors[1].profile.initial_trust, 75.0);
        assert_eq!(config.sensors[1].profile.predicted_reliability, 40.0);
        assert_eq!(config.evaluation_interval(), Duration::from_secs(5));
        assert_eq!(config.sensor_timeout(), Duration::from_millis(1500));
        assert_eq!(config.report_every_cycles, 10);
        assert_eq!(config.trust.alpha, 0.5);
        assert_eq!(config.trust.failure_penalty, 5.0);
        assert!(config.ending_marker.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn duplicate_addresses_rejected() {
        let mut config: ControllerConfig = serde_json::from_str(CONFIG).unwrap();
        config.sensors[1].profile.address = config.sensors[0].profile.address.clone();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_trust_rules_rejected() {
        let mut config: ControllerConfig = serde_json::from_str(CONFIG).unwrap();
        config.trust.alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config: ControllerConfig = serde_json::from_str(CONFIG).unwrap();
        config.trust.trust_floor = 90.0;
        config.trust.trust_ceiling = 50.0;
        assert!(config.validate().is_err());
    }
}
