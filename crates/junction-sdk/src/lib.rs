//! Junction SDK - clients for the testbed's two wire surfaces
//!
//! [`SimClient`] talks to the simulation engine's HTTP API, [`SensorClient`]
//! speaks the sensor line protocol.

pub mod sensor;
pub mod sim;

pub use sensor::{SensorClient, SensorError};
pub use sim::{ClientError, SimClient};
