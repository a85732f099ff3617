//! Single-owner fusion engine: propagates on every inertial sample and, on a
//! delayed position fix, rewinds the history to the fix's timestamp, corrects
//! there and replays the inertial samples that followed.

use crate::config::FusionConfig;
use crate::correct::{correct, ObservationModel, PositionObservation};
use crate::error::{ConfigError, FusionError};
use crate::history::{HistoryBuffer, HistoryEntry};
use crate::propagate::{propagate, ImuSample, ProcessModel};
use crate::state::{ErrorCovariance, NominalState, UnitQuaternionr, Vector3r};
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// OUTPUTS
// ---------------------------------------------------------------------------

/// Published pose/velocity estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Estimate {
    pub timestamp_s: f64,
    pub orientation: UnitQuaternionr,
    pub position: Vector3r,
    pub velocity: Vector3r,
}

/// Outcome of one sensor event. Informational; the engine always keeps running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterStatus {
    /// First inertial sample seen; it only sets the time origin.
    Initialized,
    Propagated,
    Corrected,
    /// Event applied, with a caveat (stale baseline, history eviction).
    Degraded(FusionError),
    /// Event discarded; estimate unchanged.
    Rejected(FusionError),
}

impl FilterStatus {
    pub fn is_rejected(&self) -> bool {
        matches!(self, FilterStatus::Rejected(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FusionStats {
    pub propagated: u64,
    pub rejected_samples: u64,
    pub corrections: u64,
    pub stale_corrections: u64,
    pub singular_aborts: u64,
    pub rejected_observations: u64,
    pub evicted_entries: u64,
    pub replayed_samples: u64,
}

/// Receives every estimate the engine publishes.
pub trait EstimateSink {
    fn publish(&mut self, estimate: &Estimate);
}

/// Discards estimates.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EstimateSink for NullSink {
    fn publish(&mut self, _estimate: &Estimate) {}
}

impl EstimateSink for Vec<Estimate> {
    fn publish(&mut self, estimate: &Estimate) {
        self.push(*estimate);
    }
}

impl EstimateSink for Sender<Estimate> {
    fn publish(&mut self, estimate: &Estimate) {
        if self.send(*estimate).is_err() {
            debug!("estimate receiver dropped, discarding t={:.4}", estimate.timestamp_s);
        }
    }
}

// ---------------------------------------------------------------------------
// ENGINE
// ---------------------------------------------------------------------------
pub struct FusionEngine<S: EstimateSink = NullSink> {
    config: FusionConfig,
    process: ProcessModel,
    observation: ObservationModel,

    state: NominalState,
    covariance: ErrorCovariance,
    history: HistoryBuffer,

    /// Timestamp of the last applied inertial sample.
    last_time_s: Option<f64>,
    estimate_time_s: f64,

    overflowing: bool,
    stats: FusionStats,
    sink: S,
}

impl FusionEngine<NullSink> {
    pub fn with_config(config: FusionConfig) -> Result<Self, ConfigError> {
        Self::new(config, NullSink)
    }
}

impl<S: EstimateSink> FusionEngine<S> {
    /// Engine at rest at the origin with the configured initial uncertainty.
    pub fn new(config: FusionConfig, sink: S) -> Result<Self, ConfigError> {
        Self::with_initial_state(config, NominalState::new(), sink)
    }

    pub fn with_initial_state(
        config: FusionConfig,
        initial: NominalState,
        sink: S,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut state = initial;
        state.renormalize();
        Ok(Self {
            process: ProcessModel::from_config(&config),
            observation: ObservationModel::from_config(&config),
            covariance: config.initial.covariance(),
            history: HistoryBuffer::new(config.history),
            config,
            state,
            last_time_s: None,
            estimate_time_s: 0.0,
            overflowing: false,
            stats: FusionStats::default(),
            sink,
        })
    }

    // =====================================================================
    // INERTIAL
    // =====================================================================

    pub fn on_inertial_sample(&mut self, timestamp_s: f64, sample: ImuSample) -> FilterStatus {
        if !timestamp_s.is_finite() || !sample.is_finite() {
            return self.reject_sample(timestamp_s, FusionError::NonFiniteInput);
        }

        let Some(prev) = self.last_time_s else {
            info!("first inertial sample at t={timestamp_s:.4}, filter initialized");
            self.last_time_s = Some(timestamp_s);
            self.estimate_time_s = timestamp_s;
            let evicted = self
                .history
                .append(timestamp_s, sample, self.state, self.covariance);
            self.note_eviction(evicted);
            return FilterStatus::Initialized;
        };

        let dt = timestamp_s - prev;
        let (state, covariance) =
            match propagate(&self.state, &self.covariance, &sample, dt, &self.process) {
                Ok(next) => next,
                Err(e) => return self.reject_sample(timestamp_s, e),
            };

        self.state = state;
        self.covariance = covariance;
        self.last_time_s = Some(timestamp_s);
        self.estimate_time_s = timestamp_s;
        self.stats.propagated += 1;

        let evicted = self.history.append(timestamp_s, sample, state, covariance);
        let overflow = self.note_eviction(evicted);

        self.publish();
        match overflow {
            Some(e) => FilterStatus::Degraded(e),
            None => FilterStatus::Propagated,
        }
    }

    fn reject_sample(&mut self, timestamp_s: f64, error: FusionError) -> FilterStatus {
        warn!("rejected inertial sample at t={timestamp_s}: {error}");
        self.stats.rejected_samples += 1;
        FilterStatus::Rejected(error)
    }

    // =====================================================================
    // POSITION
    // =====================================================================

    pub fn on_position_observation(&mut self, timestamp_s: f64, x: f64, y: f64) -> FilterStatus {
        let observation = PositionObservation::new(x, y);
        if !timestamp_s.is_finite() || !observation.is_finite() {
            warn!("rejected position observation at t={timestamp_s}: non-finite input");
            self.stats.rejected_observations += 1;
            return FilterStatus::Rejected(FusionError::NonFiniteInput);
        }

        let preceding = self.history.drop_before(timestamp_s);
        let following = self.history.drain_all();

        // Baseline: the snapshot taken at the fix time, else the newest one
        // older than it, else the oldest one retained, else the live estimate
        // (no history yet).
        let (baseline, replay_from) = match (preceding.last(), following.first()) {
            (_, Some(entry)) if entry.timestamp_s == timestamp_s => (Some(entry), 1),
            (Some(entry), _) => (Some(entry), 0),
            (None, Some(entry)) => (Some(entry), 1),
            (None, None) => (None, 0),
        };
        let (base_state, base_cov, base_time) = match baseline {
            Some(entry) => (entry.state, entry.covariance, Some(entry.timestamp_s)),
            None => (self.state, self.covariance, self.last_time_s),
        };
        let stale = base_time.filter(|&t| t > timestamp_s);

        let (mut state, mut covariance) =
            match correct(&base_state, &base_cov, &observation, &self.observation) {
                Ok(next) => next,
                Err(e) => {
                    warn!("aborted position observation at t={timestamp_s}: {e}");
                    self.restore_history(preceding, following);
                    if matches!(e, FusionError::SingularInnovationCovariance { .. }) {
                        self.stats.singular_aborts += 1;
                    } else {
                        self.stats.rejected_observations += 1;
                    }
                    return FilterStatus::Rejected(e);
                }
            };

        let mut t_prev = base_time;
        let mut evicted = 0;
        if let Some(entry) = baseline {
            evicted += self
                .history
                .append(entry.timestamp_s, entry.sample, state, covariance);
        }

        let replay_count = following.len().saturating_sub(replay_from);
        for entry in following.iter().skip(replay_from) {
            let Some(prev) = t_prev else { break };
            match propagate(
                &state,
                &covariance,
                &entry.sample,
                entry.timestamp_s - prev,
                &self.process,
            ) {
                Ok((s, p)) => {
                    state = s;
                    covariance = p;
                    t_prev = Some(entry.timestamp_s);
                    evicted += self.history.append(entry.timestamp_s, entry.sample, s, p);
                    self.stats.replayed_samples += 1;
                }
                Err(e) => warn!("skipped replay of sample at t={}: {e}", entry.timestamp_s),
            }
        }

        self.state = state;
        self.covariance = covariance;
        match t_prev {
            Some(t) => {
                self.last_time_s = Some(t);
                self.estimate_time_s = t;
            }
            // No inertial data yet: stamp with the fix itself.
            None => self.estimate_time_s = timestamp_s,
        }
        self.stats.corrections += 1;
        self.note_eviction(evicted);

        debug!(
            "corrected at t={timestamp_s:.4} (baseline {:?}), replayed {replay_count} samples",
            base_time
        );
        self.publish();

        match stale {
            Some(oldest_s) => {
                let error = FusionError::StaleObservation {
                    timestamp_s,
                    oldest_s,
                };
                warn!("{error}; corrected against oldest snapshot");
                self.stats.stale_corrections += 1;
                FilterStatus::Degraded(error)
            }
            None => FilterStatus::Corrected,
        }
    }

    fn restore_history(&mut self, preceding: Vec<HistoryEntry>, following: Vec<HistoryEntry>) {
        for entry in preceding.into_iter().chain(following) {
            self.history.push(entry);
        }
    }

    // =====================================================================
    // BOOKKEEPING
    // =====================================================================

    fn note_eviction(&mut self, evicted: usize) -> Option<FusionError> {
        if evicted == 0 {
            if self.overflowing {
                info!("history back within capacity");
                self.overflowing = false;
            }
            return None;
        }

        self.stats.evicted_entries += evicted as u64;
        let error = FusionError::BufferOverflow { evicted };
        if self.overflowing {
            debug!("{error}");
        } else {
            warn!("{error}; oldest snapshots are no longer rewindable");
            self.overflowing = true;
        }
        Some(error)
    }

    fn publish(&mut self) {
        let estimate = self.estimate();
        self.sink.publish(&estimate);
    }

    // =====================================================================
    // ACCESSORS
    // =====================================================================

    pub fn estimate(&self) -> Estimate {
        Estimate {
            timestamp_s: self.estimate_time_s,
            orientation: self.state.orientation,
            position: self.state.position,
            velocity: self.state.velocity,
        }
    }

    pub fn state(&self) -> &NominalState {
        &self.state
    }

    pub fn covariance(&self) -> &ErrorCovariance {
        &self.covariance
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn last_time_s(&self) -> Option<f64> {
        self.last_time_s
    }

    pub fn stats(&self) -> FusionStats {
        self.stats
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
