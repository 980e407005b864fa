//! Engine configuration from environment.

use junction_core::config::WaitPolicy;
use junction_core::simulation::SimulationRules;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub graph_path: PathBuf,
    pub cluster_map_path: PathBuf,
    pub tick: Duration,
    pub rules: SimulationRules,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
    /// How long to wait for the topology files to appear
    pub topology_wait: WaitPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            graph_path: PathBuf::from("/shared/graph_structure.json"),
            cluster_map_path: PathBuf::from("/shared/cluster_edge_map.json"),
            tick: Duration::from_secs(2),
            rules: SimulationRules::default(),
            seed: None,
            topology_wait: WaitPolicy {
                timeout: Duration::from_secs(30),
                interval: Duration::from_secs(1),
            },
        }
    }
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}

fn probability(key: &str) -> Option<f64> {
    let value = parsed::<f64>(key)?;
    if value.is_finite() {
        Some(value.clamp(0.0, 1.0))
    } else {
        tracing::warn!("Ignoring non-finite {}={}", key, value);
        None
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let rules = SimulationRules {
            max_groups: parsed("JUNCTION_MAX_GROUPS").unwrap_or(defaults.rules.max_groups),
            min_group_size: parsed("JUNCTION_MIN_GROUP_SIZE").unwrap_or(defaults.rules.min_group_size),
            max_group_size: parsed("JUNCTION_MAX_GROUP_SIZE").unwrap_or(defaults.rules.max_group_size),
            priority_probability: probability("JUNCTION_PRIORITY_PROBABILITY")
                .unwrap_or(defaults.rules.priority_probability),
            spawns_per_tick: parsed("JUNCTION_SPAWNS_PER_TICK")
                .unwrap_or(defaults.rules.spawns_per_tick),
        };

        Self {
            port: parsed("JUNCTION_SIM_PORT").unwrap_or(defaults.port),
            graph_path: env::var("JUNCTION_GRAPH_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.graph_path),
            cluster_map_path: env::var("JUNCTION_CLUSTER_MAP_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cluster_map_path),
            tick: parsed::<u64>("JUNCTION_TICK_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick),
            rules,
            seed: parsed("JUNCTION_SEED"),
            topology_wait: WaitPolicy {
                timeout: parsed::<u64>("JUNCTION_TOPOLOGY_WAIT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.topology_wait.timeout),
                ..defaults.topology_wait
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_rejects_non_finite_and_clamps() {
        let cases = [
            ("JUNCTION_TEST_PROBABILITY_NAN", "NaN", None),
            ("JUNCTION_TEST_PROBABILITY_INF", "inf", None),
            ("JUNCTION_TEST_PROBABILITY_HIGH", "2.5", Some(1.0)),
            ("JUNCTION_TEST_PROBABILITY_LOW", "-0.3", Some(0.0)),
            ("JUNCTION_TEST_PROBABILITY_OK", " 0.25 ", Some(0.25)),
            ("JUNCTION_TEST_PROBABILITY_BAD", "often", None),
        ];
        for (key, raw, expected) in cases {
            env::set_var(key, raw);
            assert_eq!(probability(key), expected, "{}={:?}", key, raw);
            env::remove_var(key);
        }
        assert_eq!(probability("JUNCTION_TEST_PROBABILITY_UNSET"), None);
    }
}
