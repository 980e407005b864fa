//! Road graph and cluster map loading.
//!
//! The graph arrives in node-link JSON as written by the offline topology
//! step; the cluster map assigns each monitored edge a numeric cluster id.

use crate::models::{EdgeKey, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed topology document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("self-loop on node {0}")]
    SelfLoop(NodeId),

    #[error("graph has no edges")]
    NoEdges,

    #[error("cluster id '{0}' is not numeric")]
    InvalidClusterId(String),
}

/// Static attributes of a road segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeAttributes {
    /// Free-flow speed in distance-units per hour
    pub speed_limit: f64,
    /// Vehicle-units the segment holds before saturating
    pub capacity: f64,
    pub distance: f64,
}

impl Default for EdgeAttributes {
    fn default() -> Self {
        Self {
            speed_limit: 60.0,
            capacity: 50.0,
            distance: 1.0,
        }
    }
}

/// Immutable undirected road graph.
#[derive(Debug, Clone, Default)]
pub struct RoadGraph {
    adjacency: BTreeMap<NodeId, Vec<NodeId>>,
    edges: HashMap<EdgeKey, EdgeAttributes>,
}

impl RoadGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeId) {
        self.adjacency.entry(node).or_default();
    }

    /// Insert or replace an edge. Both endpoints are created if missing.
    pub fn add_edge(
        &mut self,
        a: NodeId,
        b: NodeId,
        attrs: EdgeAttributes,
    ) -> Result<(), TopologyError> {
        if a == b {
            return Err(TopologyError::SelfLoop(a));
        }
        let key = EdgeKey::new(a, b);
        if self.edges.insert(key, attrs).is_none() {
            self.adjacency.entry(a).or_default().push(b);
            self.adjacency.entry(b).or_default().push(a);
        }
        Ok(())
    }

    /// Builder form of [`add_edge`](Self::add_edge) for fixed fixtures.
    ///
    /// # Panics
    ///
    /// Panics if `a == b`. Use `add_edge` for untrusted input.
    pub fn with_edge(mut self, a: NodeId, b: NodeId, attrs: EdgeAttributes) -> Self {
        if let Err(err) = self.add_edge(a, b, attrs) {
            panic!("invalid fixture edge {}-{}: {}", a, b, err);
        }
        self
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.adjacency.contains_key(&node)
    }

    /// Node ids in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        self.adjacency
            .get(&node)
            .map(|n| n.as_slice())
            .unwrap_or(&[])
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&EdgeAttributes> {
        self.edges.get(key)
    }

    pub fn edge_between(&self, a: NodeId, b: NodeId) -> Option<&EdgeAttributes> {
        self.edges.get(&EdgeKey::new(a, b))
    }

    pub fn edges(&self) -> impl Iterator<Item = (&EdgeKey, &EdgeAttributes)> {
        self.edges.iter()
    }

    /// Parse a networkx-style node-link document.
    pub fn from_node_link_json(json: &str) -> Result<Self, TopologyError> {
        let doc: NodeLinkDocument = serde_json::from_str(json)?;
        let mut graph = RoadGraph::new();
        for node in doc.nodes {
            graph.add_node(node.id);
        }
        for link in doc.links {
            graph.add_edge(
                link.source,
                link.target,
                EdgeAttributes {
                    speed_limit: link.speed_limit,
                    capacity: link.capacity,
                    distance: link.distance,
                },
            )?;
        }
        if graph.edge_count() == 0 {
            return Err(TopologyError::NoEdges);
        }
        Ok(graph)
    }
}

#[derive(Debug, Deserialize)]
struct NodeLinkDocument {
    #[serde(default)]
    nodes: Vec<NodeLinkNode>,
    #[serde(default, alias = "edges")]
    links: Vec<NodeLinkEdge>,
}

#[derive(Debug, Deserialize)]
struct NodeLinkNode {
    id: NodeId,
}

#[derive(Debug, Deserialize)]
struct NodeLinkEdge {
    source: NodeId,
    target: NodeId,
    #[serde(default = "default_speed_limit")]
    speed_limit: f64,
    #[serde(default = "default_capacity")]
    capacity: f64,
    #[serde(default = "default_distance")]
    distance: f64,
}

fn default_speed_limit() -> f64 {
    EdgeAttributes::default().speed_limit
}

fn default_capacity() -> f64 {
    EdgeAttributes::default().capacity
}

fn default_distance() -> f64 {
    EdgeAttributes::default().distance
}

/// Cluster id → monitored edge.
#[derive(Debug, Clone, Default)]
pub struct ClusterMap {
    clusters: BTreeMap<u32, EdgeKey>,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    edge: Option<Vec<NodeId>>,
}

impl ClusterMap {
    pub fn new(clusters: BTreeMap<u32, EdgeKey>) -> Self {
        Self { clusters }
    }

    /// Parse `{"<cluster_id>": {"edge": [u, v]}, ...}`.
    ///
    /// Entries without a two-node edge, or whose edge is not in `graph`, are
    /// skipped with a warning.
    pub fn from_json(json: &str, graph: &RoadGraph) -> Result<Self, TopologyError> {
        let raw: BTreeMap<String, ClusterEntry> = serde_json::from_str(json)?;
        let mut clusters = BTreeMap::new();
        for (id, entry) in raw {
            let cluster_id: u32 = id
                .trim()
                .parse()
                .map_err(|_| TopologyError::InvalidClusterId(id.clone()))?;
            let Some([u, v]) = entry.edge.as_deref().and_then(|e| <[NodeId; 2]>::try_from(e).ok())
            else {
                tracing::warn!("Cluster {} has no usable edge, skipping", cluster_id);
                continue;
            };
            let key = EdgeKey::new(u, v);
            if graph.edge(&key).is_none() {
                tracing::warn!("Cluster {} maps to unknown edge {}, skipping", cluster_id, key);
                continue;
            }
            clusters.insert(cluster_id, key);
        }
        Ok(Self { clusters })
    }

    pub fn edge_for(&self, cluster_id: u32) -> Option<EdgeKey> {
        self.clusters.get(&cluster_id).copied()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Graph plus cluster assignment, loaded once per engine run.
#[derive(Debug, Clone)]
pub struct Topology {
    pub graph: Arc<RoadGraph>,
    pub clusters: ClusterMap,
}

impl Topology {
    pub fn new(graph: RoadGraph, clusters: ClusterMap) -> Self {
        Self {
            graph: Arc::new(graph),
            clusters,
        }
    }

    /// Read both topology documents from disk.
    pub fn load(graph_path: &Path, cluster_map_path: &Path) -> Result<Self, TopologyError> {
        let graph_json = read_file(graph_path)?;
        let graph = RoadGraph::from_node_link_json(&graph_json)?;
        let cluster_json = read_file(cluster_map_path)?;
        let clusters = ClusterMap::from_json(&cluster_json, &graph)?;
        Ok(Self::new(graph, clusters))
    }
}

fn read_file(path: &Path) -> Result<String, TopologyError> {
    std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPH: &str = r#"{
        "directed": false,
        "multigraph": false,
        "graph": {},
        "nodes": [{"id": 0}, {"id": 1}, {"id": 2}, {"id": 5}],
        "links": [
            {"source": 0, "target": 1, "speed_limit": 80, "capacity": 40, "distance": 1.0},
            {"source": 2, "target": 1, "speed_limit": 30, "capacity": 20},
            {"source": 1, "target": 5}
        ]
    }"#;

    #[test]
    #[should_panic(expected = "invalid fixture edge 3-3")]
    fn builder_rejects_self_loop() {
        let _ = RoadGraph::new()
            .with_edge(1, 3, EdgeAttributes::default())
            .with_edge(3, 3, EdgeAttributes::default());
    }

    #[test]
    fn parses_node_link_with_defaults() {
        let graph = RoadGraph::from_node_link_json(GRAPH).unwrap();
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 3);

        let edge = graph.edge_between(1, 2).unwrap();
        assert_eq!(edge.speed_limit, 30.0);
        assert_eq!(edge.distance, 1.0);

        let defaulted = graph.edge_between(5, 1).unwrap();
        assert_eq!(*defaulted, EdgeAttributes::default());

        let mut neighbors = graph.neighbors(1).to_vec();
        neighbors.sort();
        assert_eq!(neighbors, vec![0, 2, 5]);
    }

    #[test]
    fn accepts_edges_alias() {
        let json = r#"{"nodes": [{"id": 1}, {"id": 2}], "edges": [{"source": 1, "target": 2}]}"#;
        let graph = RoadGraph::from_node_link_json(json).unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn rejects_empty_and_self_loops() {
        let empty = r#"{"nodes": [{"id": 1}], "links": []}"#;
        assert!(matches!(
            RoadGraph::from_node_link_json(empty),
            Err(TopologyError::NoEdges)
        ));

        let looped = r#"{"nodes": [{"id": 1}], "links": [{"source": 1, "target": 1}]}"#;
        assert!(matches!(
            RoadGraph::from_node_link_json(looped),
            Err(TopologyError::SelfLoop(1))
        ));
    }

    #[test]
    fn cluster_map_skips_unknown_edges() {
        let graph = RoadGraph::from_node_link_json(GRAPH).unwrap();
        let map = ClusterMap::from_json(
            r#"{"1": {"edge": [1, 0]}, "2": {"edge": [0, 5]}, "3": {}}"#,
            &graph,
        )
        .unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.edge_for(1), Some(EdgeKey::new(0, 1)));
        assert_eq!(map.edge_for(2), None);
    }

    #[test]
    fn cluster_map_rejects_non_numeric_ids() {
        let graph = RoadGraph::from_node_link_json(GRAPH).unwrap();
        let err = ClusterMap::from_json(r#"{"abc": {"edge": [0, 1]}}"#, &graph).unwrap_err();
        assert!(matches!(err, TopologyError::InvalidClusterId(_)));
    }
}
