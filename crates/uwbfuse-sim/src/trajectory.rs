use nalgebra::{UnitQuaternion, Vector3};
use uwbfuse_core::{NominalState, STANDARD_GRAVITY};

// ---------------------------------------------------------------------------
// Ground Truth
// ---------------------------------------------------------------------------

/// Kinematic truth at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TruthSample {
    pub time: f64,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>, // body -> world
    pub ang_vel: Vector3<f64>,            // body
    pub specific_force: Vector3<f64>,     // body, what the accelerometer sees
}

/// Constant-speed horizontal circle around the origin with the body x axis
/// pointing along the direction of travel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CircleTrajectory {
    pub radius: f64,       // m
    pub angular_rate: f64, // rad/s, positive = counter-clockwise seen from above
    pub height: f64,       // m
    pub gravity: Vector3<f64>,
}

impl Default for CircleTrajectory {
    fn default() -> Self {
        Self {
            radius: 2.0,
            angular_rate: 0.5,
            height: 1.0,
            gravity: Vector3::new(0.0, 0.0, -STANDARD_GRAVITY),
        }
    }
}

impl CircleTrajectory {
    pub fn sample(&self, t: f64) -> TruthSample {
        let (r, w) = (self.radius, self.angular_rate);
        let phase = w * t;
        let (s, c) = phase.sin_cos();

        let position = Vector3::new(r * c, r * s, self.height);
        let velocity = Vector3::new(-r * w * s, r * w * c, 0.0);
        let accel_world = Vector3::new(-r * w * w * c, -r * w * w * s, 0.0);

        // Heading follows the tangent; flipped for clockwise travel.
        let heading = phase + w.signum() * std::f64::consts::FRAC_PI_2;
        let orientation = UnitQuaternion::from_euler_angles(0.0, 0.0, heading);

        TruthSample {
            time: t,
            position,
            velocity,
            orientation,
            ang_vel: Vector3::new(0.0, 0.0, w),
            specific_force: orientation.inverse_transform_vector(&(accel_world - self.gravity)),
        }
    }

    /// Filter state matching the truth at `t`, with zero biases.
    pub fn nominal_state(&self, t: f64) -> NominalState {
        let truth = self.sample(t);
        NominalState {
            orientation: truth.orientation,
            position: truth.position,
            velocity: truth.velocity,
            ..NominalState::new()
        }
    }
}
