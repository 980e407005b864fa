//! Published snapshot store.
//!
//! The tick loop owns the `World`; the API only ever sees the last
//! `SimSnapshot` it published.

use junction_core::graph::Topology;
use junction_core::models::SimStatus;
use junction_core::snapshot::SimSnapshot;
use std::sync::{Arc, Mutex, OnceLock};

pub struct AppState {
    topology: OnceLock<Arc<Topology>>,
    snapshot: Mutex<Arc<SimSnapshot>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            topology: OnceLock::new(),
            snapshot: Mutex::new(Arc::new(SimSnapshot::default())),
        }
    }

    /// State with topology already installed.
    pub fn with_topology(topology: Topology) -> Self {
        let state = Self::new();
        state.install_topology(Arc::new(topology));
        state
    }

    /// Install the topology. Only the first call has any effect.
    pub fn install_topology(&self, topology: Arc<Topology>) -> bool {
        self.topology.set(topology).is_ok()
    }

    pub fn topology(&self) -> Option<&Arc<Topology>> {
        self.topology.get()
    }

    pub fn publish(&self, snapshot: SimSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.snapshot.lock() {
            Ok(mut current) => *current = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    pub fn snapshot(&self) -> Arc<SimSnapshot> {
        match self.snapshot.lock() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn status(&self) -> SimStatus {
        let snapshot = self.snapshot();
        let stats = snapshot.stats;
        SimStatus {
            status: "running".to_string(),
            topology_loaded: self.topology.get().is_some(),
            tick: snapshot.tick,
            active_groups: stats.active_groups,
            active_vehicles: stats.active_vehicles,
            edges_occupied: snapshot.edges_occupied(),
            total_spawned: stats.total_spawned,
            total_arrived: stats.total_arrived,
            total_broken_paths: stats.total_broken_paths,
        }
    }
}
