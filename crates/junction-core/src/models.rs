//! Core data models shared by the simulation engine, sensors and controllers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Intersection identifier in the road graph.
pub type NodeId = u32;

/// Vehicle group identifier, unique and monotonic within one engine run.
pub type GroupId = u64;

/// Unordered node pair identifying a road segment.
///
/// Always stored normalized as `(min, max)` so `(1, 2)` and `(2, 1)` are the
/// same key. Serialized as its label, e.g. `"1-2"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EdgeKey {
    u: NodeId,
    v: NodeId,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid edge label '{0}', expected '<u>-<v>'")]
pub struct EdgeLabelError(pub String);

impl EdgeKey {
    pub fn new(a: NodeId, b: NodeId) -> Self {
        if a <= b {
            Self { u: a, v: b }
        } else {
            Self { u: b, v: a }
        }
    }

    pub fn u(&self) -> NodeId {
        self.u
    }

    pub fn v(&self) -> NodeId {
        self.v
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.u == node || self.v == node
    }

    /// The endpoint opposite to `node`, if `node` is an endpoint.
    pub fn other(&self, node: NodeId) -> Option<NodeId> {
        if node == self.u {
            Some(self.v)
        } else if node == self.v {
            Some(self.u)
        } else {
            None
        }
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.u, self.v)
    }
}

impl FromStr for EdgeKey {
    type Err = EdgeLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| EdgeLabelError(s.to_string()))?;
        let a = a.trim().parse().map_err(|_| EdgeLabelError(s.to_string()))?;
        let b = b.trim().parse().map_err(|_| EdgeLabelError(s.to_string()))?;
        Ok(EdgeKey::new(a, b))
    }
}

impl TryFrom<String> for EdgeKey {
    type Error = EdgeLabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EdgeKey> for String {
    fn from(key: EdgeKey) -> Self {
        key.to_string()
    }
}

/// A platoon of vehicles travelling together along a precomputed path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleGroup {
    pub id: GroupId,
    /// Vehicle-units in the platoon (always >= 1)
    pub size: u32,
    pub path: Vec<NodeId>,
    pub current_edge: EdgeKey,
    /// Path node the group last departed
    pub current_node: NodeId,
    /// Fraction of `current_edge` travelled, in `[0, 1)`
    pub position: f64,
    pub destination: NodeId,
    pub is_priority: bool,
}

impl VehicleGroup {
    /// Node the group is currently heading to.
    pub fn heading_to(&self) -> NodeId {
        self.current_edge
            .other(self.current_node)
            .unwrap_or(self.current_node)
    }
}

/// Static per-sensor profile produced by the offline provisioning step.
///
/// The predicted values are opaque priors; nothing in this workspace
/// recomputes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorProfile {
    /// `host:port` of the sensor's line-protocol listener
    pub address: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub software_version: String,
    #[serde(default)]
    pub is_signed: bool,
    #[serde(default)]
    pub software_age_years: f64,
    #[serde(default)]
    pub device_age_years: f64,
    /// 0-100
    #[serde(default = "default_reliability")]
    pub predicted_reliability: f64,
    /// 0-1
    #[serde(default = "default_noise_propensity")]
    pub predicted_noise_propensity: f64,
    /// 0-1
    #[serde(default = "default_data_consistency")]
    pub predicted_data_consistency: f64,
    /// 0-100
    #[serde(default = "default_initial_trust")]
    pub initial_trust: f64,
}

fn default_reliability() -> f64 {
    70.0
}

fn default_noise_propensity() -> f64 {
    0.15
}

fn default_data_consistency() -> f64 {
    0.80
}

fn default_initial_trust() -> f64 {
    75.0
}

// === Simulation engine API payloads ===

/// `GET /traffic/{cluster_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeTrafficResponse {
    pub cluster_id: u32,
    pub edge_u: NodeId,
    pub edge_v: NodeId,
    pub current_traffic_count: u32,
    #[serde(default)]
    pub priority_detected: bool,
}

impl EdgeTrafficResponse {
    pub fn edge(&self) -> EdgeKey {
        EdgeKey::new(self.edge_u, self.edge_v)
    }
}

/// Load on one approach of an intersection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachTraffic {
    pub traffic: u32,
    pub priority_detected: bool,
}

/// `GET /approaching_traffic/{node_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachingTrafficResponse {
    pub node_id: NodeId,
    /// Keyed by edge label
    pub traffic_per_approach: BTreeMap<String, ApproachTraffic>,
}

/// `GET /passed_through_node_count/{node_id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageResponse {
    pub node_id: NodeId,
    pub cars_passed_through_last_step: u32,
}

/// `GET /status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimStatus {
    pub status: String,
    pub topology_loaded: bool,
    pub tick: u64,
    pub active_groups: usize,
    pub active_vehicles: u64,
    pub edges_occupied: usize,
    pub total_spawned: u64,
    pub total_arrived: u64,
    pub total_broken_paths: u64,
}
