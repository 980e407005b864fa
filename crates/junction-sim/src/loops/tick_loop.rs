//! Fixed-period simulation tick loop.
//!
//! Waits for the topology files, then advances the world once per period and
//! publishes a fresh snapshot after every tick. The period is soft real-time:
//! processing time is subtracted from the sleep, and an overrun skips the
//! sleep with a warning.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::Config;
use crate::state::AppState;
use junction_core::config::retry_until;
use junction_core::graph::{Topology, TopologyError};
use junction_core::simulation::World;

pub async fn load_topology(config: &Config) -> Result<Topology, TopologyError> {
    retry_until(config.topology_wait, "topology", || {
        Topology::load(&config.graph_path, &config.cluster_map_path)
    })
    .await
}

/// Load the topology and run ticks until shutdown.
///
/// Returns an error only if the topology never becomes loadable.
pub async fn run_tick_loop(
    state: Arc<AppState>,
    config: Config,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let topology = tokio::select! {
        _ = shutdown.recv() => {
            tracing::info!("Tick loop shutting down before topology load");
            return Ok(());
        }
        loaded = load_topology(&config) => loaded.with_context(|| {
            format!(
                "topology unavailable ({} / {})",
                config.graph_path.display(),
                config.cluster_map_path.display()
            )
        })?,
    };

    tracing::info!(
        "Topology loaded: {} nodes, {} edges, {} clusters",
        topology.graph.node_count(),
        topology.graph.edge_count(),
        topology.clusters.len()
    );
    let topology = Arc::new(topology);
    state.install_topology(topology.clone());

    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut world = World::new(topology.graph.clone(), config.rules.clone(), rng);
    state.publish(world.snapshot());

    run_ticks(&state, &mut world, config.tick, shutdown).await;
    Ok(())
}

async fn run_ticks(
    state: &AppState,
    world: &mut World,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let tick_secs = period.as_secs_f64();
    tracing::info!("Tick loop started ({:?} per tick)", period);

    loop {
        let started = Instant::now();
        let report = world.step(tick_secs);
        state.publish(world.snapshot());

        tracing::debug!(
            "Tick {}: {} groups live, +{} spawned, {} arrived, {} vehicles passed",
            report.tick,
            world.group_count(),
            report.spawned,
            report.arrived,
            report.vehicles_passed
        );

        let elapsed = started.elapsed();
        let pause = match period.checked_sub(elapsed) {
            Some(pause) => pause,
            None => {
                tracing::warn!(
                    "Tick {} overran its period ({:?} > {:?})",
                    report.tick,
                    elapsed,
                    period
                );
                Duration::ZERO
            }
        };

        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Tick loop shutting down at tick {}", report.tick);
                break;
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_core::config::WaitPolicy;
    use std::path::PathBuf;

    const GRAPH: &str = r#"{
        "nodes": [{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}],
        "links": [
            {"source": 1, "target": 2, "speed_limit": 60, "capacity": 10, "distance": 0.05},
            {"source": 2, "target": 3, "speed_limit": 60, "capacity": 10, "distance": 0.05},
            {"source": 3, "target": 4, "speed_limit": 60, "capacity": 10, "distance": 0.05}
        ]
    }"#;
    const CLUSTERS: &str = r#"{"0": {"edge": [1, 2]}, "1": {"edge": [3, 2]}}"#;

    fn write_topology(tag: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir();
        let graph = dir.join(format!("junction-sim-graph-{}-{}.json", tag, std::process::id()));
        let clusters = dir.join(format!("junction-sim-clusters-{}-{}.json", tag, std::process::id()));
        std::fs::write(&graph, GRAPH).unwrap();
        std::fs::write(&clusters, CLUSTERS).unwrap();
        (graph, clusters)
    }

    fn test_config(graph_path: PathBuf, cluster_map_path: PathBuf) -> Config {
        Config {
            graph_path,
            cluster_map_path,
            tick: Duration::from_millis(100),
            seed: Some(7),
            topology_wait: WaitPolicy {
                timeout: Duration::from_millis(300),
                interval: Duration::from_millis(50),
            },
            ..Config::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_publish_snapshots_until_shutdown() {
        let (graph, clusters) = write_topology("ticks");
        let state = Arc::new(AppState::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(run_tick_loop(
            state.clone(),
            test_config(graph.clone(), clusters.clone()),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(1050)).await;
        let snapshot = state.snapshot();
        assert!(state.topology().is_some());
        assert!(snapshot.tick >= 5, "tick = {}", snapshot.tick);
        assert!(snapshot.stats.total_spawned > 0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        std::fs::remove_file(graph).unwrap();
        std::fs::remove_file(clusters).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_topology_is_fatal_after_wait() {
        let dir = std::env::temp_dir();
        let config = test_config(
            dir.join("junction-sim-absent-graph.json"),
            dir.join("junction-sim-absent-clusters.json"),
        );
        let state = Arc::new(AppState::new());
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let result = run_tick_loop(state.clone(), config, shutdown_rx).await;
        assert!(result.is_err());
        assert!(state.topology().is_none());
    }
}
