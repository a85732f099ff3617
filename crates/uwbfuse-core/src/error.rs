use thiserror::Error;

/// Conditions raised while processing a single sensor event.
///
/// None of these are fatal: the engine recovers locally and reports them
/// through [`crate::engine::FilterStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum FusionError {
    /// Sample timestamp does not advance past the last propagated one.
    #[error("non-positive propagation interval: dt = {dt} s")]
    NonPositiveInterval { dt: f64 },

    /// Innovation covariance cannot be inverted.
    #[error("innovation covariance is singular (det = {determinant:e})")]
    SingularInnovationCovariance { determinant: f64 },

    /// Observation is older than every retained history entry.
    #[error("observation at {timestamp_s} s precedes retained history (oldest {oldest_s} s)")]
    StaleObservation { timestamp_s: f64, oldest_s: f64 },

    /// History reached capacity and dropped its oldest entries.
    #[error("history buffer full, evicted {evicted} entries")]
    BufferOverflow { evicted: usize },

    /// NaN or infinity in a timestamp or measurement.
    #[error("non-finite value in sensor input")]
    NonFiniteInput,
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{name} must be finite and >= 0, got {value}")]
    InvalidNoise { name: &'static str, value: f64 },

    #[error("{name} must be finite and >= 0, got {value}")]
    InvalidSigma { name: &'static str, value: f64 },

    #[error("frame rotation quaternion has zero or non-finite norm")]
    InvalidFrameRotation,

    #[error("gravity vector must be finite")]
    InvalidGravity,

    #[error("history capacity must retain at least one entry")]
    EmptyHistory,

    #[error("history span must be finite and > 0, got {0}")]
    InvalidHistorySpan(f64),
}

pub type FusionResult<T> = Result<T, FusionError>;

/// Failures of the channel-fed worker, never of the filter itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("fusion worker has stopped accepting events")]
    Stopped,

    #[error("fusion worker thread panicked")]
    Panicked,
}
