//! Vehicle-group simulation over a road graph.
//!
//! [`World`] owns every piece of mutable simulation state. It is meant to be
//! driven by a single tick loop; queriers only ever see the immutable
//! [`SimSnapshot`] produced after a tick completes.

use crate::graph::RoadGraph;
use crate::models::{EdgeKey, GroupId, NodeId, VehicleGroup};
use crate::routing::{shortest_path, travel_time_secs, EdgeLoads};
use crate::snapshot::{GroupView, SimSnapshot, SimStats};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Spawn parameters for the group population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRules {
    /// No spawns while this many groups are live
    pub max_groups: usize,
    pub min_group_size: u32,
    pub max_group_size: u32,
    /// Chance a new group carries a priority vehicle
    pub priority_probability: f64,
    pub spawns_per_tick: usize,
}

impl SimulationRules {
    /// `priority_probability` as a valid probability; non-finite values count as zero.
    pub fn priority_chance(&self) -> f64 {
        if self.priority_probability.is_finite() {
            self.priority_probability.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl Default for SimulationRules {
    fn default() -> Self {
        Self {
            max_groups: 50,
            min_group_size: 2,
            max_group_size: 8,
            priority_probability: 0.05,
            spawns_per_tick: 1,
        }
    }
}

/// Summary of one completed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub spawned: usize,
    pub arrived: usize,
    pub broken_paths: usize,
    pub vehicles_passed: u32,
}

enum Step {
    Advance(f64),
    Transfer { edge: EdgeKey, from: NodeId },
    Arrived,
    Broken,
}

/// Authoritative simulation state.
pub struct World {
    graph: Arc<RoadGraph>,
    rules: SimulationRules,
    groups: BTreeMap<GroupId, VehicleGroup>,
    occupancy: HashMap<EdgeKey, BTreeSet<GroupId>>,
    passage: HashMap<NodeId, u32>,
    next_group_id: GroupId,
    tick: u64,
    stats: SimStats,
    rng: StdRng,
}

impl World {
    pub fn new(graph: Arc<RoadGraph>, rules: SimulationRules, rng: StdRng) -> Self {
        Self {
            graph,
            rules,
            groups: BTreeMap::new(),
            occupancy: HashMap::new(),
            passage: HashMap::new(),
            next_group_id: 0,
            tick: 0,
            stats: SimStats::default(),
            rng,
        }
    }

    /// World with a reproducible random stream.
    pub fn seeded(graph: Arc<RoadGraph>, rules: SimulationRules, seed: u64) -> Self {
        Self::new(graph, rules, StdRng::seed_from_u64(seed))
    }

    pub fn graph(&self) -> &RoadGraph {
        &self.graph
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn groups(&self) -> impl Iterator<Item = &VehicleGroup> {
        self.groups.values()
    }

    pub fn group(&self, id: GroupId) -> Option<&VehicleGroup> {
        self.groups.get(&id)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn occupancy(&self) -> &HashMap<EdgeKey, BTreeSet<GroupId>> {
        &self.occupancy
    }

    /// Vehicle-units currently on each occupied edge.
    pub fn edge_loads(&self) -> EdgeLoads {
        let mut loads = EdgeLoads::new();
        for (edge, ids) in &self.occupancy {
            let total: u32 = ids
                .iter()
                .filter_map(|id| self.groups.get(id))
                .map(|g| g.size)
                .sum();
            if total > 0 {
                loads.insert(*edge, total);
            }
        }
        loads
    }

    /// True when the occupancy index is exactly the partition of live groups
    /// by `current_edge`.
    pub fn occupancy_is_consistent(&self) -> bool {
        let mut indexed = 0usize;
        for (edge, ids) in &self.occupancy {
            for id in ids {
                match self.groups.get(id) {
                    Some(group) if group.current_edge == *edge => indexed += 1,
                    _ => return false,
                }
            }
        }
        indexed == self.groups.len()
    }

    /// Create a group at the start of `path` if it is routable.
    ///
    /// Only the first hop is validated; later hops are checked as the group
    /// reaches them.
    pub fn place_group(&mut self, path: Vec<NodeId>, size: u32, is_priority: bool) -> Option<GroupId> {
        if path.len() < 2 {
            return None;
        }
        let (start, next) = (path[0], path[1]);
        let edge = EdgeKey::new(start, next);
        self.graph.edge(&edge)?;
        let destination = *path.last()?;

        let id = self.next_group_id;
        self.next_group_id += 1;
        self.groups.insert(
            id,
            VehicleGroup {
                id,
                size: size.max(1),
                path,
                current_edge: edge,
                current_node: start,
                position: 0.0,
                destination,
                is_priority,
            },
        );
        self.occupancy.entry(edge).or_default().insert(id);
        self.stats.total_spawned += 1;
        Some(id)
    }

    /// Route a new group from `source` to `destination` under current load.
    pub fn spawn_between(&mut self, source: NodeId, destination: NodeId) -> Option<GroupId> {
        if self.groups.len() >= self.rules.max_groups || source == destination {
            return None;
        }
        let loads = self.edge_loads();
        let path = shortest_path(&self.graph, &loads, source, destination)?;
        if path.len() < 2 {
            return None;
        }
        let (lo, hi) = ordered(self.rules.min_group_size.max(1), self.rules.max_group_size.max(1));
        let size = self.rng.random_range(lo..=hi);
        let is_priority = self.rng.random_bool(self.rules.priority_chance());
        self.place_group(path, size, is_priority)
    }

    /// Spawn one group between two distinct random nodes.
    pub fn spawn_random(&mut self) -> Option<GroupId> {
        if self.groups.len() >= self.rules.max_groups {
            return None;
        }
        let nodes: Vec<NodeId> = self.graph.nodes().collect();
        if nodes.len() < 2 {
            return None;
        }
        let i = self.rng.random_range(0..nodes.len());
        let mut j = self.rng.random_range(0..nodes.len() - 1);
        if j >= i {
            j += 1;
        }
        self.spawn_between(nodes[i], nodes[j])
    }

    /// Move every live group forward by `tick_secs`.
    ///
    /// Travel times come from the occupancy at the start of the call, so the
    /// result does not depend on iteration order.
    pub fn advance(&mut self, tick_secs: f64) -> TickReport {
        self.passage.clear();
        let loads = self.edge_loads();
        let mut report = TickReport::default();

        let mut steps: Vec<(GroupId, Step)> = Vec::with_capacity(self.groups.len());
        for group in self.groups.values() {
            let Some(attrs) = self.graph.edge(&group.current_edge) else {
                steps.push((group.id, Step::Broken));
                continue;
            };
            let travel_time = travel_time_secs(attrs, loads.get(&group.current_edge).copied().unwrap_or(0));
            let progress = if travel_time <= 0.0 {
                1.0
            } else if travel_time.is_finite() {
                tick_secs.max(0.0) / travel_time
            } else {
                0.0
            };

            let position = group.position + progress;
            if position < 1.0 {
                steps.push((group.id, Step::Advance(position)));
                continue;
            }

            let reached = group.heading_to();
            *self.passage.entry(reached).or_insert(0) += group.size;
            report.vehicles_passed += group.size;

            if reached == group.destination {
                steps.push((group.id, Step::Arrived));
                continue;
            }

            let next = group
                .path
                .iter()
                .position(|&n| n == reached)
                .and_then(|idx| group.path.get(idx + 1))
                .copied();
            match next {
                Some(next) if self.graph.edge_between(reached, next).is_some() => {
                    steps.push((
                        group.id,
                        Step::Transfer {
                            edge: EdgeKey::new(reached, next),
                            from: reached,
                        },
                    ));
                }
                _ => {
                    tracing::warn!(
                        "Group {} has no valid edge after node {}, removing",
                        group.id,
                        reached
                    );
                    steps.push((group.id, Step::Broken));
                }
            }
        }

        for (id, step) in steps {
            match step {
                Step::Advance(position) => {
                    if let Some(group) = self.groups.get_mut(&id) {
                        group.position = position;
                    }
                }
                Step::Transfer { edge, from } => {
                    let Some(group) = self.groups.get_mut(&id) else {
                        continue;
                    };
                    let old_edge = group.current_edge;
                    group.current_edge = edge;
                    group.current_node = from;
                    group.position = 0.0;
                    self.unindex(id, &old_edge);
                    self.occupancy.entry(edge).or_default().insert(id);
                }
                Step::Arrived => {
                    self.remove_group(id);
                    report.arrived += 1;
                    self.stats.total_arrived += 1;
                }
                Step::Broken => {
                    self.remove_group(id);
                    report.broken_paths += 1;
                    self.stats.total_broken_paths += 1;
                }
            }
        }

        report
    }

    /// One full tick: spawn attempts followed by a position update.
    pub fn step(&mut self, tick_secs: f64) -> TickReport {
        let mut spawned = 0;
        for _ in 0..self.rules.spawns_per_tick {
            if self.spawn_random().is_some() {
                spawned += 1;
            }
        }
        let mut report = self.advance(tick_secs);
        self.tick += 1;
        report.tick = self.tick;
        report.spawned = spawned;
        debug_assert!(self.occupancy_is_consistent());
        report
    }

    /// Immutable copy of the state a querier may see.
    pub fn snapshot(&self) -> SimSnapshot {
        let mut edges: HashMap<EdgeKey, Vec<GroupView>> = HashMap::new();
        let mut active_vehicles = 0u64;
        for group in self.groups.values() {
            active_vehicles += group.size as u64;
            edges.entry(group.current_edge).or_default().push(GroupView {
                id: group.id,
                size: group.size,
                current_node: group.current_node,
                is_priority: group.is_priority,
            });
        }
        SimSnapshot {
            tick: self.tick,
            edges,
            passage: self.passage.clone(),
            stats: SimStats {
                active_groups: self.groups.len(),
                active_vehicles,
                ..self.stats
            },
        }
    }

    fn remove_group(&mut self, id: GroupId) {
        if let Some(group) = self.groups.remove(&id) {
            self.unindex(id, &group.current_edge);
        }
    }

    fn unindex(&mut self, id: GroupId, edge: &EdgeKey) {
        if let Some(ids) = self.occupancy.get_mut(edge) {
            ids.remove(&id);
            if ids.is_empty() {
                self.occupancy.remove(edge);
            }
        }
    }
}

fn ordered(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeAttributes;

    fn attrs(speed_limit: f64, capacity: f64) -> EdgeAttributes {
        EdgeAttributes {
            speed_limit,
            capacity,
            distance: 1.0,
        }
    }

    fn grid() -> Arc<RoadGraph> {
        // 3x3 grid, node = row * 3 + col
        let mut graph = RoadGraph::new();
        for row in 0..3u32 {
            for col in 0..3u32 {
                let node = row * 3 + col;
                if col < 2 {
                    graph = graph.with_edge(node, node + 1, attrs(60.0 + (node * 7 % 40) as f64, 20.0));
                }
                if row < 2 {
                    graph = graph.with_edge(node, node + 3, attrs(50.0, 30.0));
                }
            }
        }
        Arc::new(graph)
    }

    fn diamond(capacity: f64) -> Arc<RoadGraph> {
        Arc::new(
            RoadGraph::new()
                .with_edge(0, 1, attrs(60.0, capacity))
                .with_edge(1, 3, attrs(60.0, capacity))
                .with_edge(0, 2, attrs(60.0, capacity))
                .with_edge(2, 3, attrs(60.0, capacity)),
        )
    }

    #[test]
    fn two_groups_on_one_edge_sum_to_edge_traffic() {
        let graph = Arc::new(RoadGraph::new().with_edge(1, 2, attrs(60.0, 10.0)));
        let mut world = World::seeded(graph, SimulationRules::default(), 1);
        world.place_group(vec![1, 2], 4, false).unwrap();
        world.place_group(vec![2, 1], 6, false).unwrap();

        let snapshot = world.snapshot();
        let load = snapshot.edge_load(&EdgeKey::new(1, 2));
        assert_eq!(load.traffic, 10);
        assert!(!load.priority_detected);
        assert_eq!(world.edge_loads()[&EdgeKey::new(2, 1)], 10);
    }

    #[test]
    fn non_finite_priority_probability_spawns_plain_groups() {
        for probability in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let rules = SimulationRules {
                priority_probability: probability,
                ..SimulationRules::default()
            };
            assert_eq!(rules.priority_chance(), 0.0);

            let graph = Arc::new(RoadGraph::new().with_edge(1, 2, attrs(60.0, 10.0)));
            let mut world = World::seeded(graph, rules, 5);
            let id = world.spawn_between(1, 2).unwrap();
            assert!(!world.group(id).unwrap().is_priority);
        }

        let certain = SimulationRules {
            priority_probability: 4.0,
            ..SimulationRules::default()
        };
        assert_eq!(certain.priority_chance(), 1.0);
    }

    #[test]
    fn occupancy_partitions_groups_and_positions_stay_in_range() {
        let rules = SimulationRules {
            max_groups: 25,
            spawns_per_tick: 2,
            priority_probability: 0.2,
            ..SimulationRules::default()
        };
        let mut world = World::seeded(grid(), rules, 7);
        let mut arrived = 0;

        for _ in 0..400 {
            let report = world.step(15.0);
            arrived += report.arrived;
            assert!(world.occupancy_is_consistent(), "tick {}", world.tick());
            for group in world.groups() {
                assert!(
                    (0.0..1.0).contains(&group.position),
                    "group {} at {}",
                    group.id,
                    group.position
                );
                assert!(group.current_edge.contains(group.current_node));
            }
            assert!(world.group_count() <= 25);
        }

        assert!(arrived > 0, "some groups should finish their trip");
        assert_eq!(world.snapshot().stats.total_broken_paths, 0);
    }

    #[test]
    fn group_ids_are_unique_and_monotonic() {
        let mut world = World::seeded(grid(), SimulationRules::default(), 3);
        let mut last = None;
        for _ in 0..20 {
            if let Some(id) = world.spawn_random() {
                if let Some(prev) = last {
                    assert!(id > prev);
                }
                last = Some(id);
            }
        }
        assert!(last.is_some());
    }

    #[test]
    fn arrival_logs_passage_and_removes_group() {
        let graph = Arc::new(RoadGraph::new().with_edge(1, 2, attrs(60.0, 100.0)));
        let mut world = World::seeded(graph, SimulationRules::default(), 1);
        let id = world.place_group(vec![1, 2], 3, false).unwrap();

        // Free-flow traversal takes 60 s.
        let first = world.advance(40.0);
        assert_eq!(first.vehicles_passed, 0);
        assert!((world.group(id).unwrap().position - 40.0 / 60.0).abs() < 1e-9);

        let second = world.advance(40.0);
        assert_eq!(second.arrived, 1);
        assert_eq!(world.snapshot().passed_through(2), 3);
        assert!(world.group(id).is_none());
        assert!(world.occupancy().is_empty());

        // Passage only covers the most recent tick.
        world.advance(40.0);
        assert_eq!(world.snapshot().passed_through(2), 0);
    }

    #[test]
    fn transfer_moves_group_to_next_edge() {
        let graph = Arc::new(
            RoadGraph::new()
                .with_edge(1, 2, attrs(60.0, 100.0))
                .with_edge(2, 3, attrs(60.0, 100.0)),
        );
        let mut world = World::seeded(graph, SimulationRules::default(), 1);
        let id = world.place_group(vec![1, 2, 3], 2, true).unwrap();

        world.advance(60.0);
        let group = world.group(id).unwrap();
        assert_eq!(group.current_edge, EdgeKey::new(2, 3));
        assert_eq!(group.current_node, 2);
        assert_eq!(group.position, 0.0);
        assert_eq!(world.snapshot().passed_through(2), 2);
        assert!(world.occupancy_is_consistent());
        assert!(world.occupancy().get(&EdgeKey::new(1, 2)).is_none());
    }

    #[test]
    fn broken_path_removes_group_without_panicking() {
        let graph = Arc::new(RoadGraph::new().with_edge(1, 2, attrs(60.0, 100.0)));
        let mut world = World::seeded(graph, SimulationRules::default(), 1);
        world.place_group(vec![1, 2, 9], 5, false).unwrap();

        let report = world.advance(60.0);
        assert_eq!(report.broken_paths, 1);
        assert_eq!(world.group_count(), 0);
        assert!(world.occupancy_is_consistent());
        assert_eq!(world.snapshot().stats.total_broken_paths, 1);
    }

    #[test]
    fn spawn_skipped_without_path_or_over_ceiling() {
        let graph = Arc::new(
            RoadGraph::new()
                .with_edge(0, 1, attrs(60.0, 10.0))
                .with_edge(2, 3, attrs(60.0, 10.0)),
        );
        let rules = SimulationRules {
            max_groups: 1,
            ..SimulationRules::default()
        };
        let mut world = World::seeded(graph, rules, 1);
        assert!(world.spawn_between(0, 3).is_none());
        assert!(world.spawn_between(0, 0).is_none());
        assert!(world.spawn_between(0, 1).is_some());
        assert!(world.spawn_between(2, 3).is_none(), "ceiling reached");
    }

    #[test]
    fn spawn_sizes_respect_configured_range() {
        let rules = SimulationRules {
            max_groups: 500,
            min_group_size: 3,
            max_group_size: 5,
            ..SimulationRules::default()
        };
        let mut world = World::seeded(grid(), rules, 11);
        for _ in 0..100 {
            world.spawn_random();
        }
        assert!(world.group_count() > 0);
        assert!(world.groups().all(|g| (3..=5).contains(&g.size)));
    }

    #[test]
    fn saturated_branch_pushes_new_spawns_to_parallel_branch() {
        let rules = SimulationRules {
            max_groups: 100,
            min_group_size: 2,
            max_group_size: 2,
            priority_probability: 0.0,
            ..SimulationRules::default()
        };

        let count_via = |world: &World, via: NodeId| {
            world
                .groups()
                .filter(|g| g.path.len() == 3 && g.path[1] == via)
                .count()
        };

        let mut baseline = World::seeded(diamond(100.0), rules.clone(), 5);
        for _ in 0..10 {
            baseline.spawn_between(0, 3).unwrap();
        }
        assert!(count_via(&baseline, 1) > 0);

        let mut saturated = World::seeded(diamond(100.0), rules, 5);
        saturated.place_group(vec![0, 1], 100, false).unwrap();
        for _ in 0..10 {
            saturated.spawn_between(0, 3).unwrap();
        }
        assert_eq!(count_via(&saturated, 1), 0);
        assert_eq!(count_via(&saturated, 2), 10);
    }
}
