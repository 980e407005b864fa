//! Loading JSON configuration files that may not exist yet.
//!
//! Sensor and controller configs are written by whatever launches the
//! testbed, sometimes after the processes start. Loaders poll until the file
//! parses or the wait window closes.

use crate::backoff::Backoff;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How long to keep polling for a file that is missing or incomplete.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            interval: Duration::from_millis(500),
        }
    }
}

impl WaitPolicy {
    pub fn from_secs(timeout_secs: f64, interval_secs: f64) -> Self {
        Self {
            timeout: Duration::from_secs_f64(timeout_secs.max(0.0)),
            interval: Duration::from_secs_f64(interval_secs.max(0.001)),
        }
    }
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Call `attempt` until it succeeds or `policy.timeout` elapses, returning
/// the last error on timeout. Always tries at least once.
pub async fn retry_until<T, E, F>(policy: WaitPolicy, what: &str, mut attempt: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let started = Instant::now();
    let mut backoff = Backoff::fixed(policy.interval);
    loop {
        match attempt() {
            Ok(value) => {
                if backoff.attempts() > 0 {
                    tracing::info!("{} available after {} retries", what, backoff.attempts());
                }
                return Ok(value);
            }
            Err(err) => {
                if started.elapsed() >= policy.timeout {
                    tracing::error!("Gave up waiting for {} after {:?}: {}", what, policy.timeout, err);
                    return Err(err);
                }
                let delay = backoff.fail().unwrap_or(policy.interval);
                if backoff.attempts() == 1 {
                    tracing::info!("Waiting for {}: {}", what, err);
                } else {
                    tracing::debug!("Still waiting for {}: {}", what, err);
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// [`load_json`] under a [`WaitPolicy`].
pub async fn load_json_with_retry<T: DeserializeOwned>(
    path: &Path,
    policy: WaitPolicy,
) -> Result<T, ConfigError> {
    let what = format!("config {}", path.display());
    retry_until(policy, &what, || load_json(path)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(default)]
        count: u32,
    }

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("junction-config-{}-{}.json", tag, std::process::id()))
    }

    #[test]
    fn load_json_reports_missing_and_malformed() {
        let missing = temp_path("missing");
        let _ = std::fs::remove_file(&missing);
        assert!(matches!(load_json::<Sample>(&missing), Err(ConfigError::Io { .. })));

        let bad = temp_path("bad");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(load_json::<Sample>(&bad), Err(ConfigError::Parse { .. })));
        std::fs::remove_file(&bad).unwrap();
    }

    #[tokio::test]
    async fn retry_picks_up_late_file() {
        let path = temp_path("late");
        let _ = std::fs::remove_file(&path);

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            std::fs::write(&writer_path, r#"{"name": "n1"}"#).unwrap();
        });

        let policy = WaitPolicy {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(20),
        };
        let loaded: Sample = load_json_with_retry(&path, policy).await.unwrap();
        writer.await.unwrap();
        assert_eq!(
            loaded,
            Sample {
                name: "n1".into(),
                count: 0
            }
        );
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn retry_gives_up_after_timeout() {
        let policy = WaitPolicy {
            timeout: Duration::from_millis(50),
            interval: Duration::from_millis(10),
        };
        let mut calls = 0;
        let result: Result<(), String> = retry_until(policy, "nothing", || {
            calls += 1;
            Err("absent".to_string())
        })
        .await;
        assert_eq!(result, Err("absent".to_string()));
        assert!(calls >= 2);
    }
}
