//! Intersection controller: fuses sensor readings through per-sensor fuzzy
//! trust and grants priority to one approach per cycle.

pub mod config;
pub mod controller;
pub mod report;

pub use config::{ControllerConfig, SensorAssignment};
pub use controller::{Controller, CycleRecord};
pub use report::{write_report, PerformanceReport, ReportError, Tally};
