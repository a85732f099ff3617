//! Nominal state, error-state covariance and the tangent-space helpers that
//! tie the two together.
//!
//! Error-state layout (15 scalars) used by every matrix in this crate:
//!
//! | rows   | block                          |
//! |--------|--------------------------------|
//! | 0..3   | orientation error `δθ` (body)  |
//! | 3..6   | position error (world)         |
//! | 6..9   | velocity error (world)         |
//! | 9..12  | accelerometer bias error       |
//! | 12..15 | gyroscope bias error           |
//!
//! The orientation error is right-multiplied: `q_true = q ⊗ Exp(δθ)`.

use nalgebra::{Matrix3, Quaternion, SMatrix, SVector, SymmetricEigen, UnitQuaternion, Vector3};

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------
pub type Scalar = f64;

pub type Vector3r = Vector3<Scalar>;
pub type Matrix3r = Matrix3<Scalar>;
pub type UnitQuaternionr = UnitQuaternion<Scalar>;

pub const ERROR_DIM: usize = 15;
pub const STATE_DIM: usize = 16;

pub type ErrorVector = SVector<Scalar, ERROR_DIM>;
pub type ErrorCovariance = SMatrix<Scalar, ERROR_DIM, ERROR_DIM>;
pub type StateVector = SVector<Scalar, STATE_DIM>;

pub const IDX_ORIENTATION: usize = 0;
pub const IDX_POSITION: usize = 3;
pub const IDX_VELOCITY: usize = 6;
pub const IDX_ACCEL_BIAS: usize = 9;
pub const IDX_GYRO_BIAS: usize = 12;

// ---------------------------------------------------------------------------
// NOMINAL STATE
// ---------------------------------------------------------------------------
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NominalState {
    pub orientation: UnitQuaternionr, // body -> world
    pub position: Vector3r,           // world (m)
    pub velocity: Vector3r,           // world (m/s)
    pub accel_bias: Vector3r,         // body (m/s²)
    pub gyro_bias: Vector3r,          // body (rad/s)
}

impl NominalState {
    pub fn new() -> Self {
        Self {
            orientation: UnitQuaternionr::identity(),
            position: Vector3r::zeros(),
            velocity: Vector3r::zeros(),
            accel_bias: Vector3r::zeros(),
            gyro_bias: Vector3r::zeros(),
        }
    }

    /// Rotate the orientation by `dq` expressed in the body frame, then
    /// renormalize to remove floating-point drift.
    pub fn compose_rotation(&mut self, dq: &UnitQuaternionr) {
        self.orientation = renormalize(&(self.orientation * dq));
    }

    pub fn renormalize(&mut self) {
        self.orientation = renormalize(&self.orientation);
    }

    /// Inject an error-state correction into the nominal state.
    pub fn boxplus(&self, dx: &ErrorVector) -> Self {
        let mut out = *self;
        let theta: Vector3r = dx.fixed_rows::<3>(IDX_ORIENTATION).into_owned();
        out.compose_rotation(&UnitQuaternionr::from_scaled_axis(theta));
        out.position += dx.fixed_rows::<3>(IDX_POSITION).into_owned();
        out.velocity += dx.fixed_rows::<3>(IDX_VELOCITY).into_owned();
        out.accel_bias += dx.fixed_rows::<3>(IDX_ACCEL_BIAS).into_owned();
        out.gyro_bias += dx.fixed_rows::<3>(IDX_GYRO_BIAS).into_owned();
        out
    }

    /// Error-state difference such that `other.boxplus(&self.boxminus(other)) == self`.
    pub fn boxminus(&self, other: &NominalState) -> ErrorVector {
        let mut dx = ErrorVector::zeros();
        let dq = other.orientation.inverse() * self.orientation;
        dx.fixed_rows_mut::<3>(IDX_ORIENTATION)
            .copy_from(&dq.scaled_axis());
        dx.fixed_rows_mut::<3>(IDX_POSITION)
            .copy_from(&(self.position - other.position));
        dx.fixed_rows_mut::<3>(IDX_VELOCITY)
            .copy_from(&(self.velocity - other.velocity));
        dx.fixed_rows_mut::<3>(IDX_ACCEL_BIAS)
            .copy_from(&(self.accel_bias - other.accel_bias));
        dx.fixed_rows_mut::<3>(IDX_GYRO_BIAS)
            .copy_from(&(self.gyro_bias - other.gyro_bias));
        dx
    }

    /// `[qw qx qy qz | p | v | ba | bg]`
    pub fn to_vector(&self) -> StateVector {
        let q = self.orientation.quaternion();
        let mut x = StateVector::zeros();
        x[0] = q.w;
        x[1] = q.i;
        x[2] = q.j;
        x[3] = q.k;
        x.fixed_rows_mut::<3>(4).copy_from(&self.position);
        x.fixed_rows_mut::<3>(7).copy_from(&self.velocity);
        x.fixed_rows_mut::<3>(10).copy_from(&self.accel_bias);
        x.fixed_rows_mut::<3>(13).copy_from(&self.gyro_bias);
        x
    }

    pub fn from_vector(x: &StateVector) -> Self {
        Self {
            orientation: UnitQuaternionr::new_normalize(Quaternion::new(x[0], x[1], x[2], x[3])),
            position: x.fixed_rows::<3>(4).into_owned(),
            velocity: x.fixed_rows::<3>(7).into_owned(),
            accel_bias: x.fixed_rows::<3>(10).into_owned(),
            gyro_bias: x.fixed_rows::<3>(13).into_owned(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|v| v.is_finite())
    }
}

impl Default for NominalState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ROTATION HELPERS
// ---------------------------------------------------------------------------

/// First-order quaternion for a small rotation vector `theta`:
/// `[sqrt(1 - |h|²), h]` with `h = theta / 2`.
///
/// Rotations too large for the approximation (`|h| >= 1`) use the exact
/// exponential map instead.
pub fn small_angle_quaternion(theta: &Vector3r) -> UnitQuaternionr {
    let h = theta * 0.5;
    let h2 = h.norm_squared();
    if h2 >= 1.0 {
        return UnitQuaternionr::from_scaled_axis(*theta);
    }
    UnitQuaternionr::new_normalize(Quaternion::new((1.0 - h2).sqrt(), h.x, h.y, h.z))
}

fn renormalize(q: &UnitQuaternionr) -> UnitQuaternionr {
    UnitQuaternionr::new_normalize(q.into_inner())
}

pub fn skew_symmetric(v: &Vector3r) -> Matrix3r {
    Matrix3r::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

// ---------------------------------------------------------------------------
// COVARIANCE HYGIENE
// ---------------------------------------------------------------------------
pub fn symmetrize(p: &ErrorCovariance) -> ErrorCovariance {
    (p + p.transpose()) * 0.5
}

/// Largest absolute difference between `p` and its transpose.
pub fn asymmetry(p: &ErrorCovariance) -> Scalar {
    (p - p.transpose()).amax()
}

pub fn min_eigenvalue(p: &ErrorCovariance) -> Scalar {
    SymmetricEigen::new(symmetrize(p))
        .eigenvalues
        .iter()
        .copied()
        .fold(Scalar::INFINITY, Scalar::min)
}

/// Block-diagonal covariance from per-block standard deviations.
pub fn block_diagonal_covariance(sigmas: [Scalar; 5]) -> ErrorCovariance {
    let mut p = ErrorCovariance::zeros();
    for (block, sigma) in sigmas.iter().enumerate() {
        p.fixed_view_mut::<3, 3>(block * 3, block * 3)
            .fill_diagonal(sigma * sigma);
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_state() -> NominalState {
        NominalState {
            orientation: UnitQuaternionr::from_euler_angles(0.1, -0.2, 0.7),
            position: Vector3r::new(1.0, 2.0, 3.0),
            velocity: Vector3r::new(-0.5, 0.25, 0.0),
            accel_bias: Vector3r::new(0.01, 0.02, -0.03),
            gyro_bias: Vector3r::new(1e-3, -2e-3, 5e-4),
        }
    }

    #[test]
    fn test_boxplus_boxminus_inverse() {
        let base = sample_state();
        let mut dx = ErrorVector::zeros();
        for i in 0..ERROR_DIM {
            dx[i] = 0.01 * (i as Scalar + 1.0);
        }
        let moved = base.boxplus(&dx);
        let back = moved.boxminus(&base);
        assert_relative_eq!(back, dx, epsilon = 1e-10);
    }

    #[test]
    fn test_boxplus_keeps_unit_norm() {
        let mut dx = ErrorVector::zeros();
        dx.fixed_rows_mut::<3>(IDX_ORIENTATION)
            .copy_from(&Vector3r::new(3.0, -1.0, 2.0));
        let s = sample_state().boxplus(&dx);
        assert_relative_eq!(s.orientation.quaternion().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_small_angle_matches_exponential() {
        let theta = Vector3r::new(1e-3, -2e-3, 0.5e-3);
        let approx_q = small_angle_quaternion(&theta);
        let exact_q = UnitQuaternionr::from_scaled_axis(theta);
        assert!(approx_q.angle_to(&exact_q) < 1e-9);
    }

    #[test]
    fn test_small_angle_falls_back_for_large_rotation() {
        let theta = Vector3r::new(0.0, 0.0, 3.0);
        let q = small_angle_quaternion(&theta);
        assert!(q.quaternion().w.is_finite());
        assert_relative_eq!(q.angle(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_vector_layout() {
        let s = sample_state();
        let x = s.to_vector();
        assert_eq!(x[4], 1.0);
        assert_eq!(x[9], 0.0);
        assert_eq!(x[15], 5e-4);
        let back = NominalState::from_vector(&x);
        assert_relative_eq!(back.position, s.position);
        assert!(back.orientation.angle_to(&s.orientation) < 1e-12);
    }

    #[test]
    fn test_skew_symmetric_is_cross_product() {
        let a = Vector3r::new(1.0, -2.0, 3.0);
        let b = Vector3r::new(0.5, 4.0, -1.0);
        assert_relative_eq!(skew_symmetric(&a) * b, a.cross(&b), epsilon = 1e-12);
    }

    #[test]
    fn test_block_diagonal_covariance() {
        let p = block_diagonal_covariance([0.1, 1.0, 0.5, 0.02, 0.001]);
        assert_relative_eq!(p[(0, 0)], 0.01, epsilon = 1e-15);
        assert_relative_eq!(p[(4, 4)], 1.0, epsilon = 1e-15);
        assert_relative_eq!(p[(14, 14)], 1e-6, epsilon = 1e-15);
        assert_eq!(asymmetry(&p), 0.0);
        assert!(min_eigenvalue(&p) > 0.0);
    }
}
