//! uwbfuse Simulation Library
//!
//! Synthetic circle trajectories, noisy delayed sensor streams and a runner
//! that scores the estimator against ground truth.

pub mod runner;
pub mod sensor;
pub mod trajectory;

// Re-export main types
pub use runner::{run_scenario, ScenarioRecord, ScenarioResult, StatusCounts};
pub use sensor::{generate_events, SensorConfig, TimedEvent};
pub use trajectory::{CircleTrajectory, TruthSample};
