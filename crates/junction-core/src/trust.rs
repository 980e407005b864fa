//! Per-sensor trust estimation.
//!
//! Every evaluation cycle a controller feeds each sensor's observation through
//! [`TrustModel::update`]. Plausible readings go through fuzzy inference over
//! peer agreement, passage confirmation and the sensor's static priors, and
//! the result is blended into the running trust. Silent, implausible or
//! uninferable sensors take fixed penalties instead.

use crate::fuzzy::{Antecedent, FuzzyEngine, FuzzyError, LinguisticVariable, Rule, Triangle};
use crate::models::{EdgeKey, SensorProfile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const TRUST_FLOOR: f64 = 10.0;
pub const TRUST_CEILING: f64 = 100.0;

// Fuzzy variable names.
pub const PEER_DEVIATION: &str = "peer_deviation";
pub const PASSAGE_DEVIATION: &str = "passage_deviation";
pub const RELIABILITY: &str = "reliability";
pub const CONSISTENCY: &str = "consistency";
pub const NOISE_PROPENSITY: &str = "noise_propensity";
pub const TRUST_UPDATE: &str = "trust_update";

/// Tunables for trust estimation and the priority decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustRules {
    /// Weight of the fuzzy output in the exponential blend
    pub alpha: f64,
    /// Penalty for no response, error sentinel or malformed reply
    pub failure_penalty: f64,
    /// Penalty for a reading outside `[0, max_plausible_traffic]`
    pub implausible_penalty: f64,
    pub inference_error_penalty: f64,
    pub trust_floor: f64,
    pub trust_ceiling: f64,
    /// Minimum trust for a congestion reading to count
    pub congestion_threshold: f64,
    /// Trust a sensor must exceed for its priority flag to count
    pub priority_threshold: f64,
    /// Also require the provisioned initial trust to exceed `priority_threshold`
    pub require_provisioned_priority: bool,
    pub max_plausible_traffic: i64,
    /// Upper bound of the peer z-score universe
    pub max_peer_z: f64,
    /// Peer score used when no other sensor is trusted
    pub neutral_peer_z: f64,
    /// With one trusted peer or zero peer variance, any deviation scores `max_peer_z`
    pub saturate_degenerate_peers: bool,
    /// Upper bound of the passage deviation universe
    pub max_passage_deviation: f64,
    /// Passage score for sensors without passage evidence this cycle
    pub neutral_passage_deviation: f64,
}

impl Default for TrustRules {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            failure_penalty: 5.0,
            implausible_penalty: 3.0,
            inference_error_penalty: 5.0,
            trust_floor: TRUST_FLOOR,
            trust_ceiling: TRUST_CEILING,
            congestion_threshold: 40.0,
            priority_threshold: 60.0,
            require_provisioned_priority: true,
            max_plausible_traffic: 200,
            max_peer_z: 3.0,
            neutral_peer_z: 1.5,
            saturate_degenerate_peers: true,
            max_passage_deviation: 20.0,
            neutral_passage_deviation: 10.0,
        }
    }
}

impl TrustRules {
    pub fn clamp(&self, trust: f64) -> f64 {
        trust.clamp(self.trust_floor, self.trust_ceiling)
    }

    pub fn is_plausible(&self, traffic: i64) -> bool {
        (0..=self.max_plausible_traffic).contains(&traffic)
    }
}

/// The default rule base.
///
/// Any rule that can raise trust requires low or medium peer deviation, so a
/// sensor in persistent disagreement with its peers only ever fires `low`.
pub fn default_trust_engine(rules: &TrustRules) -> FuzzyEngine {
    let z = rules.max_peer_z.max(f64::EPSILON);
    let p = rules.max_passage_deviation.max(f64::EPSILON);

    let peer = LinguisticVariable::new(PEER_DEVIATION, 0.0, z)
        .with_term("low", Triangle::new(0.0, 0.0, z / 3.0))
        .with_term("medium", Triangle::new(z / 6.0, z / 2.0, z * 5.0 / 6.0))
        .with_term("high", Triangle::new(z * 2.0 / 3.0, z, z));
    let passage = LinguisticVariable::new(PASSAGE_DEVIATION, 0.0, p)
        .with_term("low", Triangle::new(0.0, 0.0, p * 0.25))
        .with_term("medium", Triangle::new(p * 0.15, p * 0.5, p * 0.85))
        .with_term("high", Triangle::new(p * 0.75, p, p));
    let reliability = LinguisticVariable::new(RELIABILITY, 0.0, 100.0)
        .with_term("low", Triangle::new(0.0, 0.0, 50.0))
        .with_term("medium", Triangle::new(40.0, 60.0, 80.0))
        .with_term("high", Triangle::new(70.0, 100.0, 100.0));
    let consistency = LinguisticVariable::new(CONSISTENCY, 0.0, 1.0)
        .with_term("poor", Triangle::new(0.0, 0.0, 0.5))
        .with_term("fair", Triangle::new(0.4, 0.6, 0.8))
        .with_term("good", Triangle::new(0.7, 1.0, 1.0));
    let noise = LinguisticVariable::new(NOISE_PROPENSITY, 0.0, 1.0)
        .with_term("low", Triangle::new(0.0, 0.0, 0.3))
        .with_term("medium", Triangle::new(0.2, 0.4, 0.6))
        .with_term("high", Triangle::new(0.5, 1.0, 1.0));
    let output = LinguisticVariable::new(TRUST_UPDATE, 0.0, 100.0)
        .with_term("low", Triangle::new(0.0, 20.0, 40.0))
        .with_term("medium", Triangle::new(30.0, 50.0, 70.0))
        .with_term("high", Triangle::new(60.0, 80.0, 100.0));

    use Antecedent as A;
    FuzzyEngine::new(output)
        .with_input(peer)
        .with_input(passage)
        .with_input(reliability)
        .with_input(consistency)
        .with_input(noise)
        .with_rule(Rule::new(
            A::all([
                A::is(PEER_DEVIATION, "low"),
                A::is(RELIABILITY, "high"),
                A::is(CONSISTENCY, "good"),
                A::is(NOISE_PROPENSITY, "low"),
            ]),
            "high",
        ))
        .with_rule(Rule::new(
            A::all([A::is(PEER_DEVIATION, "low"), A::is(PASSAGE_DEVIATION, "low")]),
            "high",
        ))
        .with_rule(Rule::new(
            A::all([A::is(PEER_DEVIATION, "low"), A::is(RELIABILITY, "medium")]),
            "medium",
        ))
        .with_rule(Rule::new(
            A::all([A::is(PEER_DEVIATION, "low"), A::is(NOISE_PROPENSITY, "medium")]),
            "medium",
        ))
        .with_rule(Rule::new(
            A::all([A::is(PEER_DEVIATION, "low"), A::is(CONSISTENCY, "fair")]),
            "medium",
        ))
        .with_rule(Rule::new(A::is(PEER_DEVIATION, "medium"), "medium"))
        .with_rule(Rule::new(
            A::any([
                A::is(PEER_DEVIATION, "high"),
                A::is(PASSAGE_DEVIATION, "high"),
                A::is(RELIABILITY, "low"),
                A::is(CONSISTENCY, "poor"),
                A::is(NOISE_PROPENSITY, "high"),
            ]),
            "low",
        ))
}

/// What a controller learned from one sensor this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorObservation {
    Reading { traffic: i64, priority: bool },
    /// Timeout, connection error, error sentinel or malformed reply
    NoResponse,
}

impl SensorObservation {
    /// The reading if it is plausible under `rules`.
    pub fn plausible(&self, rules: &TrustRules) -> Option<(u32, bool)> {
        match *self {
            SensorObservation::Reading { traffic, priority } if rules.is_plausible(traffic) => {
                u32::try_from(traffic).ok().map(|t| (t, priority))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrustOutcome {
    Blended { fuzzy_output: f64 },
    NoResponse,
    Implausible,
    InferenceError,
}

/// Trust carried across cycles for one sensor.
#[derive(Debug, Clone, Serialize)]
pub struct TrustState {
    pub current_trust: f64,
    pub initial_trust: f64,
    pub last_outcome: Option<TrustOutcome>,
}

impl TrustState {
    pub fn new(initial_trust: f64, rules: &TrustRules) -> Self {
        let initial = rules.clamp(initial_trust);
        Self {
            current_trust: initial,
            initial_trust: initial,
            last_outcome: None,
        }
    }
}

/// Confirmed passage at the controller's node for last cycle's decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassageEvidence {
    pub edge: EdgeKey,
    pub expected: f64,
    pub observed: u32,
}

/// One sensor's cycle input to [`TrustModel::update`].
#[derive(Debug, Clone, Copy)]
pub struct SensorInput<'a> {
    pub id: &'a str,
    pub edge: EdgeKey,
    pub profile: &'a SensorProfile,
    pub observation: SensorObservation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustUpdate {
    pub id: String,
    pub previous: f64,
    pub current: f64,
    pub outcome: TrustOutcome,
}

pub struct TrustModel {
    rules: TrustRules,
    engine: FuzzyEngine,
}

impl TrustModel {
    pub fn new(rules: TrustRules) -> Self {
        let engine = default_trust_engine(&rules);
        Self { rules, engine }
    }

    pub fn with_engine(rules: TrustRules, engine: FuzzyEngine) -> Self {
        Self { rules, engine }
    }

    pub fn rules(&self) -> &TrustRules {
        &self.rules
    }

    pub fn engine(&self) -> &FuzzyEngine {
        &self.engine
    }

    /// Bounded z-score of `value` against the readings of trusted peers.
    pub fn peer_deviation(&self, value: f64, peers: &[f64]) -> f64 {
        let max_z = self.rules.max_peer_z;
        if peers.is_empty() {
            return self.rules.neutral_peer_z.clamp(0.0, max_z);
        }
        let n = peers.len() as f64;
        let mean = peers.iter().sum::<f64>() / n;
        let variance = peers.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        let deviation = (value - mean).abs();

        if peers.len() == 1 || std_dev < 1e-9 {
            if deviation < 1e-9 {
                return 0.0;
            }
            return if self.rules.saturate_degenerate_peers {
                max_z
            } else {
                deviation.min(max_z)
            };
        }
        (deviation / std_dev).min(max_z)
    }

    /// Passage score for a sensor monitoring `edge`.
    pub fn passage_deviation(&self, edge: EdgeKey, evidence: Option<&PassageEvidence>) -> f64 {
        match evidence {
            Some(e) if e.edge == edge => {
                (e.observed as f64 - e.expected).abs().min(self.rules.max_passage_deviation)
            }
            _ => self.rules.neutral_passage_deviation,
        }
    }

    /// Fuzzy output in `[0, 100]` for one plausible reading.
    pub fn infer(
        &self,
        peer_deviation: f64,
        passage_deviation: f64,
        profile: &SensorProfile,
    ) -> Result<f64, FuzzyError> {
        let inputs = HashMap::from([
            (PEER_DEVIATION, peer_deviation),
            (PASSAGE_DEVIATION, passage_deviation),
            (RELIABILITY, profile.predicted_reliability),
            (CONSISTENCY, profile.predicted_data_consistency),
            (NOISE_PROPENSITY, profile.predicted_noise_propensity),
        ]);
        self.engine.infer(&inputs)
    }

    /// Update every sensor's trust for one cycle.
    ///
    /// Peer sets are chosen from trust values at the start of the cycle, so
    /// the order of `inputs` does not matter. Sensors missing from `states`
    /// are initialized from their profile.
    pub fn update(
        &self,
        states: &mut BTreeMap<String, TrustState>,
        inputs: &[SensorInput<'_>],
        evidence: Option<&PassageEvidence>,
    ) -> Vec<TrustUpdate> {
        for input in inputs {
            states
                .entry(input.id.to_string())
                .or_insert_with(|| TrustState::new(input.profile.initial_trust, &self.rules));
        }

        let trusted: Vec<(&str, f64)> = inputs
            .iter()
            .filter_map(|input| {
                let trust = states.get(input.id)?.current_trust;
                if trust < self.rules.congestion_threshold {
                    return None;
                }
                input
                    .observation
                    .plausible(&self.rules)
                    .map(|(traffic, _)| (input.id, traffic as f64))
            })
            .collect();

        let mut updates = Vec::with_capacity(inputs.len());
        for input in inputs {
            let Some(state) = states.get_mut(input.id) else {
                continue;
            };
            let previous = state.current_trust;

            let (next, outcome) = match input.observation {
                SensorObservation::NoResponse => {
                    (previous - self.rules.failure_penalty, TrustOutcome::NoResponse)
                }
                SensorObservation::Reading { traffic, .. } if !self.rules.is_plausible(traffic) => {
                    (previous - self.rules.implausible_penalty, TrustOutcome::Implausible)
                }
                SensorObservation::Reading { traffic, .. } => {
                    let peers: Vec<f64> = trusted
                        .iter()
                        .filter(|(id, _)| *id != input.id)
                        .map(|(_, value)| *value)
                        .collect();
                    let peer = self.peer_deviation(traffic as f64, &peers);
                    let passage = self.passage_deviation(input.edge, evidence);
                    match self.infer(peer, passage, input.profile) {
                        Ok(fuzzy_output) => (
                            (1.0 - self.rules.alpha) * previous + self.rules.alpha * fuzzy_output,
                            TrustOutcome::Blended { fuzzy_output },
                        ),
                        Err(err) => {
                            tracing::warn!("Fuzzy inference failed for sensor {}: {}", input.id, err);
                            (
                                previous - self.rules.inference_error_penalty,
                                TrustOutcome::InferenceError,
                            )
                        }
                    }
                }
            };

            state.current_trust = self.rules.clamp(next);
            state.last_outcome = Some(outcome);
            updates.push(TrustUpdate {
                id: input.id.to_string(),
                previous,
                current: state.current_trust,
                outcome,
            });
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(initial_trust: f64) -> SensorProfile {
        SensorProfile {
            address: "127.0.0.1:5001".into(),
            manufacturer: "acme".into(),
            software_version: "1.0".into(),
            is_signed: true,
            software_age_years: 1.0,
            device_age_years: 2.0,
            predicted_reliability: 85.0,
            predicted_noise_propensity: 0.1,
            predicted_data_consistency: 0.85,
            initial_trust,
        }
    }

    fn reading(traffic: i64) -> SensorObservation {
        SensorObservation::Reading {
            traffic,
            priority: false,
        }
    }

    fn input<'a>(id: &'a str, edge: EdgeKey, profile: &'a SensorProfile, observation: SensorObservation) -> SensorInput<'a> {
        SensorInput {
            id,
            edge,
            profile,
            observation,
        }
    }

    #[test]
    fn default_engine_is_well_formed() {
        let rules = TrustRules::default();
        assert!(default_trust_engine(&rules).validate().is_ok());
    }

    #[test]
    fn default_engine_rewards_agreement_and_punishes_disagreement() {
        let model = TrustModel::new(TrustRules::default());
        let good = profile(75.0);
        let agree = model.infer(0.0, 0.0, &good).unwrap();
        let disagree = model.infer(3.0, 10.0, &good).unwrap();
        assert!(agree > 70.0, "agree = {}", agree);
        assert!((disagree - 20.0).abs() < 1e-6, "disagree = {}", disagree);
    }

    #[test]
    fn default_engine_covers_typical_prior_combinations() {
        let model = TrustModel::new(TrustRules::default());
        for reliability in [0.0, 25.0, 50.0, 65.0, 75.0, 90.0, 100.0] {
            for consistency in [0.0, 0.3, 0.6, 0.75, 1.0] {
                for noise in [0.0, 0.25, 0.45, 0.7, 1.0] {
                    for peer in [0.0, 0.75, 1.5, 2.25, 3.0] {
                        let mut p = profile(75.0);
                        p.predicted_reliability = reliability;
                        p.predicted_data_consistency = consistency;
                        p.predicted_noise_propensity = noise;
                        let out = model.infer(peer, 10.0, &p);
                        assert!(
                            out.is_ok(),
                            "no rule for rel={} cons={} noise={} peer={}",
                            reliability,
                            consistency,
                            noise,
                            peer
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn peer_deviation_z_score() {
        let model = TrustModel::new(TrustRules::default());
        // mean 10, population std 2
        let peers = [8.0, 12.0];
        assert!((model.peer_deviation(11.0, &peers) - 0.5).abs() < 1e-12);
        assert_eq!(model.peer_deviation(100.0, &peers), 3.0);
    }

    #[test]
    fn degenerate_peers_saturate() {
        let model = TrustModel::new(TrustRules::default());
        assert_eq!(model.peer_deviation(10.0, &[10.0]), 0.0);
        assert_eq!(model.peer_deviation(11.0, &[10.0]), 3.0);
        assert_eq!(model.peer_deviation(11.0, &[10.0, 10.0, 10.0]), 3.0);
        assert_eq!(model.peer_deviation(10.0, &[]), 1.5);

        let lenient = TrustModel::new(TrustRules {
            saturate_degenerate_peers: false,
            ..TrustRules::default()
        });
        assert_eq!(lenient.peer_deviation(11.0, &[10.0]), 1.0);
    }

    #[test]
    fn passage_deviation_only_for_prioritized_edge() {
        let model = TrustModel::new(TrustRules::default());
        let edge = EdgeKey::new(1, 2);
        let evidence = PassageEvidence {
            edge,
            expected: 6.0,
            observed: 2,
        };
        assert_eq!(model.passage_deviation(edge, Some(&evidence)), 4.0);
        assert_eq!(model.passage_deviation(EdgeKey::new(2, 3), Some(&evidence)), 10.0);
        assert_eq!(model.passage_deviation(edge, None), 10.0);

        let far = PassageEvidence {
            observed: 500,
            ..evidence
        };
        assert_eq!(model.passage_deviation(edge, Some(&far)), 20.0);
    }

    #[test]
    fn unreachable_sensor_decays_by_failure_penalty_to_floor() {
        let model = TrustModel::new(TrustRules::default());
        let p = profile(32.0);
        let mut states = BTreeMap::new();
        let edge = EdgeKey::new(1, 2);

        let mut expected = 32.0;
        for _ in 0..10 {
            let updates = model.update(
                &mut states,
                &[input("a", edge, &p, SensorObservation::NoResponse)],
                None,
            );
            expected = f64::max(expected - 5.0, TRUST_FLOOR);
            assert_eq!(updates[0].outcome, TrustOutcome::NoResponse);
            assert!((states["a"].current_trust - expected).abs() < 1e-9);
        }
        assert_eq!(states["a"].current_trust, TRUST_FLOOR);
    }

    #[test]
    fn implausible_reading_takes_smaller_penalty() {
        let model = TrustModel::new(TrustRules::default());
        let p = profile(50.0);
        let edge = EdgeKey::new(1, 2);
        let mut states = BTreeMap::new();

        model.update(&mut states, &[input("a", edge, &p, reading(999))], None);
        assert_eq!(states["a"].current_trust, 47.0);
        assert_eq!(states["a"].last_outcome, Some(TrustOutcome::Implausible));

        model.update(&mut states, &[input("a", edge, &p, reading(-4))], None);
        assert_eq!(states["a"].current_trust, 44.0);
    }

    #[test]
    fn inference_error_takes_fixed_penalty() {
        // An engine with a single rule that cannot fire for these inputs.
        let rules = TrustRules::default();
        let engine = default_trust_engine(&rules);
        let narrow = FuzzyEngine::new(engine.output().clone())
            .with_input(engine.input(PEER_DEVIATION).unwrap().clone())
            .with_rule(Rule::new(Antecedent::is(PEER_DEVIATION, "high"), "low"));
        let model = TrustModel::with_engine(rules, narrow);

        let p = profile(60.0);
        let mut states = BTreeMap::new();
        let updates = model.update(
            &mut states,
            &[input("a", EdgeKey::new(1, 2), &p, reading(5))],
            None,
        );
        assert_eq!(updates[0].outcome, TrustOutcome::InferenceError);
        assert_eq!(states["a"].current_trust, 55.0);
    }

    #[test]
    fn blend_uses_exponential_smoothing() {
        let model = TrustModel::new(TrustRules::default());
        let p = profile(50.0);
        let mut states = BTreeMap::new();
        let updates = model.update(
            &mut states,
            &[input("a", EdgeKey::new(1, 2), &p, reading(5))],
            None,
        );
        let TrustOutcome::Blended { fuzzy_output } = updates[0].outcome else {
            panic!("expected blend, got {:?}", updates[0].outcome);
        };
        let expected = 0.7 * 50.0 + 0.3 * fuzzy_output;
        assert!((states["a"].current_trust - expected).abs() < 1e-9);
    }

    #[test]
    fn persistent_outlier_trust_never_increases() {
        let model = TrustModel::new(TrustRules::default());
        let p = profile(90.0);
        let edges = [
            EdgeKey::new(1, 2),
            EdgeKey::new(2, 3),
            EdgeKey::new(2, 4),
            EdgeKey::new(2, 5),
        ];
        let mut states = BTreeMap::new();
        let mut last = f64::INFINITY;

        for cycle in 0..40 {
            let inputs = [
                input("honest-1", edges[0], &p, reading(10)),
                input("honest-2", edges[1], &p, reading(10)),
                input("honest-3", edges[2], &p, reading(10)),
                input("liar", edges[3], &p, reading(45)),
            ];
            model.update(&mut states, &inputs, None);
            let trust = states["liar"].current_trust;
            assert!(trust <= last + 1e-9, "cycle {}: {} > {}", cycle, trust, last);
            assert!(trust >= TRUST_FLOOR);
            last = trust;
        }
        assert!(last < 40.0, "liar should fall below the congestion threshold");
        assert!(states["honest-1"].current_trust > last);
    }

    #[test]
    fn trust_always_within_bounds() {
        let model = TrustModel::new(TrustRules::default());
        let p = profile(100.0);
        let mut states = BTreeMap::new();
        for _ in 0..50 {
            model.update(
                &mut states,
                &[
                    input("a", EdgeKey::new(1, 2), &p, reading(10)),
                    input("b", EdgeKey::new(2, 3), &p, reading(10)),
                ],
                None,
            );
            for state in states.values() {
                assert!((TRUST_FLOOR..=TRUST_CEILING).contains(&state.current_trust));
            }
        }
    }
}
