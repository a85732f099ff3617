use crate::config::{FusionConfig, ProcessNoise};
use crate::error::{FusionError, FusionResult};
use crate::state::{
    skew_symmetric, small_angle_quaternion, symmetrize, ErrorCovariance, Matrix3r, NominalState,
    Scalar, Vector3r, IDX_ACCEL_BIAS, IDX_GYRO_BIAS, IDX_ORIENTATION, IDX_POSITION, IDX_VELOCITY,
};
use nalgebra::SMatrix;

type NoiseMapping = SMatrix<Scalar, 15, 12>;

/// One raw inertial reading in the body frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImuSample {
    pub angular_rate: Vector3r,   // rad/s
    pub specific_force: Vector3r, // m/s²
}

impl ImuSample {
    pub fn new(angular_rate: Vector3r, specific_force: Vector3r) -> Self {
        Self {
            angular_rate,
            specific_force,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.angular_rate.iter().all(|v| v.is_finite())
            && self.specific_force.iter().all(|v| v.is_finite())
    }
}

/// Fixed inputs to the motion model.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessModel {
    pub gravity: Vector3r,
    pub noise: ProcessNoise,
}

impl ProcessModel {
    pub fn from_config(config: &FusionConfig) -> Self {
        Self {
            gravity: config.gravity_vector(),
            noise: config.noise.process_noise(),
        }
    }
}

/// Advance state and covariance by one inertial sample over `dt` seconds.
pub fn propagate(
    state: &NominalState,
    covariance: &ErrorCovariance,
    sample: &ImuSample,
    dt: Scalar,
    model: &ProcessModel,
) -> FusionResult<(NominalState, ErrorCovariance)> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(FusionError::NonPositiveInterval { dt });
    }
    if !sample.is_finite() {
        return Err(FusionError::NonFiniteInput);
    }

    let w_unbiased = sample.angular_rate - state.gyro_bias;
    let a_unbiased = sample.specific_force - state.accel_bias;

    // Rotation at the start of the interval drives both the kinematics and
    // the linearization.
    let rot = state.orientation.to_rotation_matrix().into_inner();
    let a_world = rot * a_unbiased + model.gravity;

    let mut next = *state;
    next.compose_rotation(&small_angle_quaternion(&(w_unbiased * dt)));
    next.position += state.velocity * dt + 0.5 * a_world * dt * dt;
    next.velocity += a_world * dt;

    let f = transition_matrix(&rot, &w_unbiased, &a_unbiased, dt);
    let v = noise_mapping(&rot) * dt;

    let p = f * covariance * f.transpose() + v * model.noise * v.transpose();
    Ok((next, symmetrize(&p)))
}

/// `F = I + A dt` for the error-state dynamics `A`.
fn transition_matrix(
    rot: &Matrix3r,
    w_unbiased: &Vector3r,
    a_unbiased: &Vector3r,
    dt: Scalar,
) -> ErrorCovariance {
    let mut a = ErrorCovariance::zeros();
    a.fixed_view_mut::<3, 3>(IDX_ORIENTATION, IDX_ORIENTATION)
        .copy_from(&(-skew_symmetric(w_unbiased)));
    a.fixed_view_mut::<3, 3>(IDX_ORIENTATION, IDX_GYRO_BIAS)
        .fill_diagonal(-1.0);
    a.fixed_view_mut::<3, 3>(IDX_POSITION, IDX_VELOCITY)
        .fill_diagonal(1.0);
    a.fixed_view_mut::<3, 3>(IDX_VELOCITY, IDX_ORIENTATION)
        .copy_from(&(-(rot * skew_symmetric(a_unbiased))));
    a.fixed_view_mut::<3, 3>(IDX_VELOCITY, IDX_ACCEL_BIAS)
        .copy_from(&(-rot));

    ErrorCovariance::identity() + a * dt
}

/// Maps `[n_gyro, n_accel, n_accel_bias, n_gyro_bias]` into the error state.
fn noise_mapping(rot: &Matrix3r) -> NoiseMapping {
    let mut u = NoiseMapping::zeros();
    u.fixed_view_mut::<3, 3>(IDX_ORIENTATION, 0)
        .fill_diagonal(-1.0);
    u.fixed_view_mut::<3, 3>(IDX_VELOCITY, 3)
        .copy_from(&(-rot));
    u.fixed_view_mut::<3, 3>(IDX_ACCEL_BIAS, 6)
        .fill_diagonal(1.0);
    u.fixed_view_mut::<3, 3>(IDX_GYRO_BIAS, 9)
        .fill_diagonal(1.0);
    u
}
