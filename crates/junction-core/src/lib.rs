pub mod backoff;
pub mod config;
pub mod decision;
pub mod fuzzy;
pub mod graph;
pub mod models;
pub mod protocol;
pub mod routing;
pub mod shutdown;
pub mod simulation;
pub mod snapshot;
pub mod trust;

pub use backoff::Backoff;
pub use config::{load_json, load_json_with_retry, retry_until, ConfigError, WaitPolicy};
pub use decision::{decide, ground_truth, DecisionBasis, PriorityDecision, TrustedReading};
pub use fuzzy::{Antecedent, FuzzyEngine, FuzzyError, LinguisticVariable, Rule, Triangle};
pub use graph::{ClusterMap, EdgeAttributes, RoadGraph, Topology, TopologyError};
pub use models::{
    ApproachTraffic, ApproachingTrafficResponse, EdgeKey, EdgeTrafficResponse, GroupId, NodeId,
    PassageResponse, SensorProfile, SimStatus, VehicleGroup,
};
pub use protocol::{ProtocolError, SensorRequest, SensorResponse, FAILURE_SENTINEL, GET_TRAFFIC};
pub use routing::{shortest_path, EdgeLoads};
pub use simulation::{SimulationRules, TickReport, World};
pub use shutdown::shutdown_signal;
pub use snapshot::{GroupView, SimSnapshot, SimStats};
pub use trust::{
    default_trust_engine, PassageEvidence, SensorInput, SensorObservation, TrustModel,
    TrustOutcome, TrustRules, TrustState, TrustUpdate,
};
