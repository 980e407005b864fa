//! Per-controller performance report.

use chrono::{DateTime, Utc};
use junction_core::models::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Running evaluation counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub cycles_run: u64,
    /// Cycles whose ground truth could be fetched
    pub cycles_evaluated: u64,
    pub cycles_correct: u64,
}

impl Tally {
    pub fn record(&mut self, correct: Option<bool>) {
        self.cycles_run += 1;
        if let Some(correct) = correct {
            self.cycles_evaluated += 1;
            if correct {
                self.cycles_correct += 1;
            }
        }
    }

    pub fn success_ratio(&self) -> f64 {
        if self.cycles_evaluated == 0 {
            0.0
        } else {
            self.cycles_correct as f64 / self.cycles_evaluated as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub node_id: NodeId,
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub cycles_run: u64,
    pub cycles_evaluated: u64,
    pub cycles_correct: u64,
    pub success_ratio: f64,
    /// Keyed by sensor address
    pub initial_trust_scores_used: BTreeMap<String, f64>,
    pub final_trust_scores: BTreeMap<String, f64>,
}

impl PerformanceReport {
    pub fn new(
        node_id: NodeId,
        run_id: String,
        tally: Tally,
        initial_trust_scores_used: BTreeMap<String, f64>,
        final_trust_scores: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            node_id,
            run_id,
            generated_at: Utc::now(),
            cycles_run: tally.cycles_run,
            cycles_evaluated: tally.cycles_evaluated,
            cycles_correct: tally.cycles_correct,
            success_ratio: tally.success_ratio(),
            initial_trust_scores_used,
            final_trust_scores,
        }
    }
}

pub fn report_path(dir: &Path, node_id: NodeId) -> PathBuf {
    dir.join(format!("tl_{}.json", node_id))
}

/// Write `report` to `<dir>/tl_<node_id>.json`.
///
/// The file is written next to its destination and renamed into place, so
/// a reader never sees a partial report.
pub fn write_report(dir: &Path, report: &PerformanceReport) -> Result<PathBuf, ReportError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ReportError::Io { path, source }
    };

    std::fs::create_dir_all(dir).map_err(io(dir))?;
    let path = report_path(dir, report.node_id);
    let tmp = dir.join(format!(".tl_{}.json.tmp", report.node_id));

    let body = serde_json::to_vec_pretty(report)?;
    std::fs::write(&tmp, body).map_err(io(&tmp))?;
    std::fs::rename(&tmp, &path).map_err(io(&path))?;
    Ok(path)
}
