//! Congestion-aware routing over the road graph.
//!
//! Travel time depends on the live occupancy of each edge, passed in as an
//! explicit [`EdgeLoads`] snapshot so routing stays a pure function.

use crate::graph::{EdgeAttributes, RoadGraph};
use crate::models::{EdgeKey, NodeId};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Vehicle-units currently on each edge. Missing edges are empty.
pub type EdgeLoads = HashMap<EdgeKey, u32>;

/// Below this congestion ratio an edge runs at its speed limit.
pub const FREE_FLOW_RATIO: f64 = 0.1;

/// Exponent scale of the geometric speed decay above free flow.
pub const CONGESTION_DECAY: f64 = 3.0;

/// Effective speed never drops below this.
pub const MIN_EFFECTIVE_SPEED: f64 = 1.0;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Effective speed for `occupancy` vehicle-units on an edge.
///
/// Returns `None` when the edge is impassable (no capacity or no speed).
pub fn effective_speed(attrs: &EdgeAttributes, occupancy: u32) -> Option<f64> {
    if attrs.capacity <= 0.0 || attrs.speed_limit <= 0.0 {
        return None;
    }
    let congestion = (occupancy as f64 / attrs.capacity).min(1.0);
    if congestion <= FREE_FLOW_RATIO {
        return Some(attrs.speed_limit);
    }
    let decayed = attrs.speed_limit / 2f64.powf(congestion * CONGESTION_DECAY);
    Some(decayed.max(MIN_EFFECTIVE_SPEED))
}

/// Seconds to traverse an edge under the given occupancy; infinite when the
/// edge is impassable.
pub fn travel_time_secs(attrs: &EdgeAttributes, occupancy: u32) -> f64 {
    match effective_speed(attrs, occupancy) {
        Some(speed) => attrs.distance.max(0.0) / speed * SECONDS_PER_HOUR,
        None => f64::INFINITY,
    }
}

/// Travel time of `edge` in `graph` reading its load from `loads`.
pub fn edge_travel_time(graph: &RoadGraph, loads: &EdgeLoads, edge: &EdgeKey) -> f64 {
    match graph.edge(edge) {
        Some(attrs) => travel_time_secs(attrs, loads.get(edge).copied().unwrap_or(0)),
        None => f64::INFINITY,
    }
}

#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OpenNode {
    cost: FloatOrd,
    node: NodeId,
}

/// Minimum-travel-time path from `source` to `destination` (Dijkstra).
///
/// Returns the full node sequence including both endpoints, or `None` when
/// either node is unknown or no passable path exists. Ties between equal-cost
/// frontier nodes resolve towards the smaller node id.
pub fn shortest_path(
    graph: &RoadGraph,
    loads: &EdgeLoads,
    source: NodeId,
    destination: NodeId,
) -> Option<Vec<NodeId>> {
    if !graph.contains_node(source) || !graph.contains_node(destination) {
        return None;
    }
    if source == destination {
        return Some(vec![source]);
    }

    let mut open_set: BinaryHeap<Reverse<OpenNode>> = BinaryHeap::new();
    let mut best: HashMap<NodeId, f64> = HashMap::new();
    let mut came_from: HashMap<NodeId, NodeId> = HashMap::new();
    let mut closed: HashSet<NodeId> = HashSet::new();

    best.insert(source, 0.0);
    open_set.push(Reverse(OpenNode {
        cost: FloatOrd(0.0),
        node: source,
    }));

    while let Some(Reverse(current)) = open_set.pop() {
        if !closed.insert(current.node) {
            continue;
        }
        if current.node == destination {
            break;
        }

        for &next in graph.neighbors(current.node) {
            if closed.contains(&next) {
                continue;
            }
            let weight = edge_travel_time(graph, loads, &EdgeKey::new(current.node, next));
            if !weight.is_finite() {
                continue;
            }
            let tentative = current.cost.0 + weight;
            if tentative < best.get(&next).copied().unwrap_or(f64::INFINITY) {
                best.insert(next, tentative);
                came_from.insert(next, current.node);
                open_set.push(Reverse(OpenNode {
                    cost: FloatOrd(tentative),
                    node: next,
                }));
            }
        }
    }

    if !closed.contains(&destination) {
        return None;
    }

    let mut path = vec![destination];
    let mut cursor = destination;
    while let Some(&prev) = came_from.get(&cursor) {
        path.push(prev);
        cursor = prev;
    }
    path.reverse();
    Some(path)
}
