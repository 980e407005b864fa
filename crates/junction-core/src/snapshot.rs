//! Immutable per-tick view of the simulation, served to queriers.

use crate::graph::RoadGraph;
use crate::models::{ApproachTraffic, EdgeKey, GroupId, NodeId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// What a querier may see of a vehicle group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupView {
    pub id: GroupId,
    pub size: u32,
    pub current_node: NodeId,
    pub is_priority: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub active_groups: usize,
    pub active_vehicles: u64,
    pub total_spawned: u64,
    pub total_arrived: u64,
    pub total_broken_paths: u64,
}

/// Complete state of one finished tick.
#[derive(Debug, Clone, Default)]
pub struct SimSnapshot {
    pub tick: u64,
    /// Occupied edges only
    pub edges: HashMap<EdgeKey, Vec<GroupView>>,
    /// Vehicle-units that arrived at each node during this tick
    pub passage: HashMap<NodeId, u32>,
    pub stats: SimStats,
}

impl SimSnapshot {
    /// Total vehicle-units on `edge` and whether any priority group is on it.
    pub fn edge_load(&self, edge: &EdgeKey) -> ApproachTraffic {
        let mut load = ApproachTraffic::default();
        for group in self.edges.get(edge).into_iter().flatten() {
            load.traffic += group.size;
            load.priority_detected |= group.is_priority;
        }
        load
    }

    /// Per-approach load heading into `node`, keyed by edge label.
    ///
    /// Only groups that departed the far endpoint count as approaching.
    /// Returns `None` for nodes not in `graph`.
    pub fn approaching(
        &self,
        graph: &RoadGraph,
        node: NodeId,
    ) -> Option<BTreeMap<String, ApproachTraffic>> {
        if !graph.contains_node(node) {
            return None;
        }
        let mut approaches = BTreeMap::new();
        for &neighbor in graph.neighbors(node) {
            let edge = EdgeKey::new(node, neighbor);
            let mut load = ApproachTraffic::default();
            for group in self.edges.get(&edge).into_iter().flatten() {
                if group.current_node == neighbor {
                    load.traffic += group.size;
                    load.priority_detected |= group.is_priority;
                }
            }
            approaches.insert(edge.label(), load);
        }
        Some(approaches)
    }

    pub fn passed_through(&self, node: NodeId) -> u32 {
        self.passage.get(&node).copied().unwrap_or(0)
    }

    pub fn edges_occupied(&self) -> usize {
        self.edges.values().filter(|groups| !groups.is_empty()).count()
    }
}
