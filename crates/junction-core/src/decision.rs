//! Picking the approach to prioritize, and scoring the pick.

use crate::models::{ApproachTraffic, EdgeKey};
use crate::trust::TrustRules;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// A plausible reading paired with its sensor's trust at decision time.
#[derive(Debug, Clone, Copy)]
pub struct TrustedReading<'a> {
    pub sensor_id: &'a str,
    pub edge: EdgeKey,
    pub traffic: u32,
    pub priority: bool,
    pub trust: f64,
    pub initial_trust: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum DecisionBasis {
    PrioritySignal { sensor_id: String },
    Congestion,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityDecision {
    pub edge: EdgeKey,
    /// Traffic the controller expects to clear through the node
    pub expected_traffic: f64,
    #[serde(flatten)]
    pub basis: DecisionBasis,
}

fn smaller_label_wins(a: &EdgeKey, b: &EdgeKey) -> Ordering {
    // Reversed so that `max_by` prefers the lexicographically smaller label.
    b.label().cmp(&a.label())
}

/// Whether this reading's priority flag may be acted on.
pub fn priority_signal_counts(reading: &TrustedReading<'_>, rules: &TrustRules) -> bool {
    reading.priority
        && reading.trust > rules.priority_threshold
        && (!rules.require_provisioned_priority || reading.initial_trust > rules.priority_threshold)
}

/// Choose the approach to prioritize.
///
/// A priority flag from a sufficiently trusted sensor wins outright; among
/// several, higher trust, then higher traffic, then the smaller edge label.
/// Otherwise the approach with the highest trust-weighted average traffic
/// among sensors at or above the congestion threshold is chosen. Returns
/// `None` when no reading qualifies.
pub fn decide(readings: &[TrustedReading<'_>], rules: &TrustRules) -> Option<PriorityDecision> {
    let priority = readings
        .iter()
        .filter(|r| priority_signal_counts(r, rules))
        .max_by(|a, b| {
            a.trust
                .total_cmp(&b.trust)
                .then(a.traffic.cmp(&b.traffic))
                .then_with(|| smaller_label_wins(&a.edge, &b.edge))
        });
    if let Some(r) = priority {
        return Some(PriorityDecision {
            edge: r.edge,
            expected_traffic: r.traffic as f64,
            basis: DecisionBasis::PrioritySignal {
                sensor_id: r.sensor_id.to_string(),
            },
        });
    }

    let mut sums: HashMap<EdgeKey, (f64, f64)> = HashMap::new();
    for r in readings.iter().filter(|r| r.trust >= rules.congestion_threshold) {
        let entry = sums.entry(r.edge).or_insert((0.0, 0.0));
        entry.0 += r.trust * r.traffic as f64;
        entry.1 += r.trust;
    }

    sums.into_iter()
        .filter(|(_, (_, weight))| *weight > 0.0)
        .map(|(edge, (weighted, weight))| (edge, weighted / weight))
        .max_by(|(ea, a), (eb, b)| a.total_cmp(b).then_with(|| smaller_label_wins(ea, eb)))
        .map(|(edge, expected_traffic)| PriorityDecision {
            edge,
            expected_traffic,
            basis: DecisionBasis::Congestion,
        })
}

/// The approach that should have been prioritized, from engine ground truth.
///
/// Approaches carrying a priority group come first; within a class the
/// busiest approach wins and ties go to the smaller label.
pub fn ground_truth(approaches: &BTreeMap<String, ApproachTraffic>) -> Option<&str> {
    approaches
        .iter()
        .max_by(|(la, a), (lb, b)| {
            a.priority_detected
                .cmp(&b.priority_detected)
                .then(a.traffic.cmp(&b.traffic))
                .then_with(|| lb.cmp(la))
        })
        .map(|(label, _)| label.as_str())
}
