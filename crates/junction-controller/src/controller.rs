//! The per-intersection evaluation loop.
//!
//! Each cycle:
//! 1. check how much traffic cleared the node since the last decision,
//! 2. query every sensor concurrently,
//! 3. update each sensor's trust,
//! 4. decide which approach gets priority,
//! 5. score the decision against engine ground truth.
//!
//! Ground truth is only ever used for scoring.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::report::{write_report, PerformanceReport, Tally};
use junction_core::decision::{self, PriorityDecision, TrustedReading};
use junction_core::models::EdgeKey;
use junction_core::protocol::SensorResponse;
use junction_core::trust::{
    PassageEvidence, SensorInput, SensorObservation, TrustModel, TrustState, TrustUpdate,
};
use junction_sdk::{ClientError, SensorClient, SimClient};

struct SensorSlot {
    client: SensorClient,
    edge: EdgeKey,
    profile: junction_core::models::SensorProfile,
}

/// What happened in one cycle.
#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub cycle: u64,
    pub observations: Vec<(String, SensorObservation)>,
    pub passage: Option<PassageEvidence>,
    pub updates: Vec<TrustUpdate>,
    pub decision: Option<PriorityDecision>,
    /// `None` when ground truth could not be fetched
    pub ground_truth: Option<Option<String>>,
    pub correct: Option<bool>,
}

pub struct Controller {
    config: ControllerConfig,
    sim: SimClient,
    sensors: Vec<SensorSlot>,
    model: TrustModel,
    states: BTreeMap<String, TrustState>,
    last_decision: Option<PriorityDecision>,
    tally: Tally,
    run_id: String,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Result<Self, ClientError> {
        let sim = SimClient::new(config.sim_url.clone(), config.sim_timeout())?;
        let model = TrustModel::new(config.trust.clone());

        let mut states = BTreeMap::new();
        let sensors = config
            .sensors
            .iter()
            .map(|assignment| {
                states.insert(
                    assignment.profile.address.clone(),
                    TrustState::new(assignment.profile.initial_trust, model.rules()),
                );
                SensorSlot {
                    client: SensorClient::new(
                        assignment.profile.address.clone(),
                        config.sensor_timeout(),
                    ),
                    edge: assignment.edge,
                    profile: assignment.profile.clone(),
                }
            })
            .collect();

        Ok(Self {
            config,
            sim,
            sensors,
            model,
            states,
            last_decision: None,
            tally: Tally::default(),
            run_id: Uuid::new_v4().to_string(),
        })
    }

    pub fn node_id(&self) -> junction_core::models::NodeId {
        self.config.node_id
    }

    pub fn trust_states(&self) -> &BTreeMap<String, TrustState> {
        &self.states
    }

    pub fn trust(&self, address: &str) -> Option<f64> {
        self.states.get(address).map(|s| s.current_trust)
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    pub fn last_decision(&self) -> Option<&PriorityDecision> {
        self.last_decision.as_ref()
    }

    /// Passage at this node against what the last decision expected to clear.
    async fn passage_evidence(&self) -> Option<PassageEvidence> {
        let last = self.last_decision.as_ref()?;
        match self.sim.passed_through(self.config.node_id).await {
            Ok(passage) => Some(PassageEvidence {
                edge: last.edge,
                expected: last.expected_traffic,
                observed: passage.cars_passed_through_last_step,
            }),
            Err(err) => {
                tracing::warn!("Node {}: passage query failed: {}", self.config.node_id, err);
                None
            }
        }
    }

    async fn poll_sensors(&self) -> Vec<SensorObservation> {
        let queries = self.sensors.iter().map(|slot| async move {
            match slot.client.query().await {
                Ok(SensorResponse::Reading { traffic, priority }) => {
                    SensorObservation::Reading { traffic, priority }
                }
                Ok(SensorResponse::Failure) => {
                    tracing::debug!("Sensor {} reported failure", slot.client.addr());
                    SensorObservation::NoResponse
                }
                Ok(SensorResponse::UnknownRequest) => {
                    tracing::warn!("Sensor {} rejected the request", slot.client.addr());
                    SensorObservation::NoResponse
                }
                Err(err) => {
                    tracing::warn!("{}", err);
                    SensorObservation::NoResponse
                }
            }
        });
        join_all(queries).await
    }

    /// Label of the approach that should have won, or `None` if unknown.
    async fn ground_truth(&self) -> Option<Option<String>> {
        match self.sim.approaching(self.config.node_id).await {
            Ok(response) => Some(
                decision::ground_truth(&response.traffic_per_approach).map(str::to_string),
            ),
            Err(err) => {
                tracing::warn!(
                    "Node {}: ground truth unavailable: {}",
                    self.config.node_id,
                    err
                );
                None
            }
        }
    }

    pub async fn run_cycle(&mut self) -> CycleRecord {
        let passage = self.passage_evidence().await;
        let observations = self.poll_sensors().await;
        let ground_truth = self.ground_truth().await;

        let inputs: Vec<SensorInput<'_>> = self
            .sensors
            .iter()
            .zip(&observations)
            .map(|(slot, observation)| SensorInput {
                id: slot.client.addr(),
                edge: slot.edge,
                profile: &slot.profile,
                observation: *observation,
            })
            .collect();
        let updates = self.model.update(&mut self.states, &inputs, passage.as_ref());

        let rules = self.model.rules();
        let readings: Vec<TrustedReading<'_>> = inputs
            .iter()
            .filter_map(|input| {
                let (traffic, priority) = input.observation.plausible(rules)?;
                let state = self.states.get(input.id)?;
                Some(TrustedReading {
                    sensor_id: input.id,
                    edge: input.edge,
                    traffic,
                    priority,
                    trust: state.current_trust,
                    initial_trust: state.initial_trust,
                })
            })
            .collect();
        let decision = decision::decide(&readings, rules);

        let predicted = decision.as_ref().map(|d| d.edge.label());
        let correct = ground_truth.as_ref().map(|truth| *truth == predicted);
        self.tally.record(correct);

        let record = CycleRecord {
            cycle: self.tally.cycles_run,
            observations: inputs
                .iter()
                .map(|input| (input.id.to_string(), input.observation))
                .collect(),
            passage,
            updates,
            decision: decision.clone(),
            ground_truth,
            correct,
        };
        self.last_decision = decision;
        log_cycle(self.config.node_id, &record);
        record
    }

    pub fn report(&self) -> PerformanceReport {
        let initial = self
            .states
            .iter()
            .map(|(id, s)| (id.clone(), s.initial_trust))
            .collect();
        let current = self
            .states
            .iter()
            .map(|(id, s)| (id.clone(), s.current_trust))
            .collect();
        PerformanceReport::new(
            self.config.node_id,
            self.run_id.clone(),
            self.tally,
            initial,
            current,
        )
    }

    fn write_report(&self) -> Option<PathBuf> {
        match write_report(&self.config.report_dir, &self.report()) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::error!("Node {}: {}", self.config.node_id, err);
                None
            }
        }
    }

    fn ending_requested(&self) -> bool {
        self.config
            .ending_marker
            .as_deref()
            .is_some_and(|marker| marker.exists())
    }

    /// Run cycles until shutdown or the ending marker, then write the final
    /// report. A cycle in progress always completes.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> PerformanceReport {
        let period = self.config.evaluation_interval();
        tracing::info!(
            "Controller for node {} started: {} sensors, {:?} per cycle, run {}",
            self.config.node_id,
            self.sensors.len(),
            period,
            self.run_id
        );

        loop {
            let started = Instant::now();
            self.run_cycle().await;

            if self.config.report_every_cycles > 0
                && self.tally.cycles_run % self.config.report_every_cycles == 0
            {
                self.write_report();
            }
            if self.ending_requested() {
                tracing::info!("Node {}: ending marker found", self.config.node_id);
                break;
            }

            let elapsed = started.elapsed();
            let pause = match period.checked_sub(elapsed) {
                Some(pause) => pause,
                None => {
                    tracing::warn!(
                        "Node {}: cycle took {:?}, longer than {:?}",
                        self.config.node_id,
                        elapsed,
                        period
                    );
                    std::time::Duration::ZERO
                }
            };
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Node {}: shutting down", self.config.node_id);
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        let report = self.report();
        if let Some(path) = self.write_report() {
            tracing::info!(
                "Node {}: final report {} ({}/{} correct)",
                self.config.node_id,
                path.display(),
                report.cycles_correct,
                report.cycles_evaluated
            );
        }
        report
    }
}

fn log_cycle(node_id: junction_core::models::NodeId, record: &CycleRecord) {
    for update in &record.updates {
        tracing::debug!(
            "Node {} cycle {}: {} trust {:.1} -> {:.1} ({:?})",
            node_id,
            record.cycle,
            update.id,
            update.previous,
            update.current,
            update.outcome
        );
    }
    let predicted = record
        .decision
        .as_ref()
        .map(|d| d.edge.label())
        .unwrap_or_else(|| "none".to_string());
    match &record.ground_truth {
        Some(truth) => tracing::info!(
            "Node {} cycle {}: priority -> {}, ground truth -> {}, {}",
            node_id,
            record.cycle,
            predicted,
            truth.as_deref().unwrap_or("none"),
            if record.correct == Some(true) {
                "correct"
            } else {
                "incorrect"
            }
        ),
        None => tracing::info!(
            "Node {} cycle {}: priority -> {}, not evaluated",
            node_id,
            record.cycle,
            predicted
        ),
    }
}
