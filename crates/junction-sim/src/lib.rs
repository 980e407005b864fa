//! Simulation engine library surface, shared by the binary and tests.

pub mod api;
pub mod config;
pub mod loops;
pub mod state;
