//! # uwbfuse Core
//!
//! Delay-compensated error-state Kalman filter fusing a high-rate inertial
//! stream with a low-rate, network-delayed horizontal position stream.
//! - Quaternion nominal state and 15-dim error state
//! - Inertial propagation and position correction
//! - Bounded history for rewind-and-replay of delayed fixes
//! - Single-owner engine, optionally driven from a worker thread

pub mod config;
pub mod correct;
pub mod engine;
pub mod error;
pub mod history;
pub mod propagate;
pub mod state;
pub mod worker;

// Re-export core types
pub use config::{FusionConfig, InitialUncertainty, NoiseTuning, STANDARD_GRAVITY};
pub use correct::{correct, ObservationModel, PositionObservation};
pub use engine::{Estimate, EstimateSink, FilterStatus, FusionEngine, FusionStats, NullSink};
pub use error::{ConfigError, FusionError, FusionResult, WorkerError};
pub use history::{HistoryBuffer, HistoryCapacity, HistoryEntry};
pub use propagate::{propagate, ImuSample, ProcessModel};
pub use state::{ErrorCovariance, NominalState, Scalar, UnitQuaternionr, Vector3r};
pub use worker::{FusionHandle, FusionWorker, SensorEvent, EVENT_QUEUE_CAPACITY};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
