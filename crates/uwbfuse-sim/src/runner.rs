use crate::sensor::TimedEvent;
use crate::trajectory::CircleTrajectory;
use nalgebra::Vector3;
use tracing::info;
use uwbfuse_core::{
    ConfigError, Estimate, FilterStatus, FusionConfig, FusionEngine, FusionStats, NominalState,
    NullSink, SensorEvent,
};

/// Estimate after one inertial sample, next to the truth at the same time.
#[derive(Clone, Copy, Debug)]
pub struct ScenarioRecord {
    pub estimate: Estimate,
    pub truth_position: Vector3<f64>,
}

impl ScenarioRecord {
    pub fn horizontal_error(&self) -> f64 {
        (self.estimate.position - self.truth_position).xy().norm()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub initialized: usize,
    pub propagated: usize,
    pub corrected: usize,
    pub degraded: usize,
    pub rejected: usize,
}

impl StatusCounts {
    fn record(&mut self, status: FilterStatus) {
        match status {
            FilterStatus::Initialized => self.initialized += 1,
            FilterStatus::Propagated => self.propagated += 1,
            FilterStatus::Corrected => self.corrected += 1,
            FilterStatus::Degraded(_) => self.degraded += 1,
            FilterStatus::Rejected(_) => self.rejected += 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ScenarioResult {
    pub records: Vec<ScenarioRecord>,
    pub statuses: StatusCounts,
    pub stats: FusionStats,
    pub final_state: NominalState,
}

impl ScenarioResult {
    /// Root-mean-square horizontal position error over all records.
    pub fn rms_horizontal_error(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self
            .records
            .iter()
            .map(|r| r.horizontal_error().powi(2))
            .sum();
        (sum_sq / self.records.len() as f64).sqrt()
    }

    pub fn max_horizontal_error(&self) -> f64 {
        self.records
            .iter()
            .map(ScenarioRecord::horizontal_error)
            .fold(0.0, f64::max)
    }
}

/// Feed `events` to a fresh engine in arrival order and score it against `truth`.
pub fn run_scenario(
    events: &[TimedEvent],
    truth: &CircleTrajectory,
    config: FusionConfig,
    initial: NominalState,
) -> Result<ScenarioResult, ConfigError> {
    let mut engine = FusionEngine::with_initial_state(config, initial, NullSink)?;
    let mut statuses = StatusCounts::default();
    let mut records = Vec::new();

    for timed in events {
        let status = timed.event.apply(&mut engine);
        statuses.record(status);

        if let SensorEvent::Inertial { timestamp_s, .. } = timed.event {
            if !status.is_rejected() {
                records.push(ScenarioRecord {
                    estimate: engine.estimate(),
                    truth_position: truth.sample(timestamp_s).position,
                });
            }
        }
    }

    let result = ScenarioResult {
        records,
        statuses,
        stats: engine.stats(),
        final_state: *engine.state(),
    };
    info!(
        "scenario done: {} samples, {} corrections, rms {:.3} m",
        result.records.len(),
        result.stats.corrections,
        result.rms_horizontal_error()
    );
    Ok(result)
}
