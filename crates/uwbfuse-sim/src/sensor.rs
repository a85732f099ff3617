use crate::trajectory::CircleTrajectory;
use nalgebra::{UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, NormalError};
use uwbfuse_core::{ImuSample, SensorEvent};

#[derive(Clone, Debug, PartialEq)]
pub struct SensorConfig {
    pub imu_rate_hz: f64,
    pub uwb_rate_hz: f64,
    /// Delay between a UWB fix's timestamp and its delivery.
    pub uwb_latency_s: f64,

    pub noise_scale: f64,
    pub accel_noise_std: f64, // m/s^2
    pub gyro_noise_std: f64,  // rad/s
    pub uwb_noise_std: f64,   // m

    // Static biases
    pub accel_bias: Vector3<f64>,
    pub gyro_bias: Vector3<f64>,

    /// World frame -> UWB frame. Fixes are reported in the UWB frame.
    pub uwb_frame: UnitQuaternion<f64>,

    pub seed: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            imu_rate_hz: 400.0,
            uwb_rate_hz: 50.0,
            uwb_latency_s: 0.02,
            noise_scale: 1.0,
            accel_noise_std: 0.01,
            gyro_noise_std: 0.001,
            uwb_noise_std: 0.05,
            accel_bias: Vector3::zeros(),
            gyro_bias: Vector3::zeros(),
            uwb_frame: UnitQuaternion::identity(),
            seed: 42,
        }
    }
}

/// A sensor event and the time it reaches the estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedEvent {
    pub arrival_s: f64,
    pub event: SensorEvent,
}

/// Noisy IMU and UWB streams over `[0, duration_s]`, merged and sorted by
/// arrival time. Ties keep IMU samples ahead of UWB fixes.
pub fn generate_events(
    trajectory: &CircleTrajectory,
    duration_s: f64,
    cfg: &SensorConfig,
) -> Result<Vec<TimedEvent>, NormalError> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let d_accel = Normal::new(0.0, cfg.noise_scale * cfg.accel_noise_std)?;
    let d_gyro = Normal::new(0.0, cfg.noise_scale * cfg.gyro_noise_std)?;
    let d_uwb = Normal::new(0.0, cfg.noise_scale * cfg.uwb_noise_std)?;

    let mut events = Vec::new();

    // 1. IMU
    let n_imu = (duration_s * cfg.imu_rate_hz).floor() as usize + 1;
    for i in 0..n_imu {
        let t = i as f64 / cfg.imu_rate_hz;
        let truth = trajectory.sample(t);
        let sample = ImuSample::new(
            truth.ang_vel + cfg.gyro_bias + noise3(&d_gyro, &mut rng),
            truth.specific_force + cfg.accel_bias + noise3(&d_accel, &mut rng),
        );
        events.push(TimedEvent {
            arrival_s: t,
            event: SensorEvent::Inertial {
                timestamp_s: t,
                sample,
            },
        });
    }

    // 2. UWB, reported in its own frame and delivered late
    let n_uwb = (duration_s * cfg.uwb_rate_hz).floor() as usize + 1;
    for j in 0..n_uwb {
        let t = j as f64 / cfg.uwb_rate_hz;
        let truth = trajectory.sample(t);
        let world = Vector3::new(truth.position.x, truth.position.y, 0.0);
        let local = cfg.uwb_frame * world;
        events.push(TimedEvent {
            arrival_s: t + cfg.uwb_latency_s,
            event: SensorEvent::Position {
                timestamp_s: t,
                x: local.x + d_uwb.sample(&mut rng),
                y: local.y + d_uwb.sample(&mut rng),
            },
        });
    }

    events.sort_by(|a, b| a.arrival_s.total_cmp(&b.arrival_s));
    Ok(events)
}

fn noise3(d: &Normal<f64>, rng: &mut StdRng) -> Vector3<f64> {
    Vector3::new(d.sample(rng), d.sample(rng), d.sample(rng))
}
