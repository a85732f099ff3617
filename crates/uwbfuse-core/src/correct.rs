use crate::config::FusionConfig;
use crate::error::{FusionError, FusionResult};
use crate::state::{
    symmetrize, ErrorCovariance, NominalState, Scalar, UnitQuaternionr, Vector3r, ERROR_DIM,
    IDX_POSITION,
};
use nalgebra::{Cholesky, Matrix2, SMatrix, Vector2};

type ObservationMatrix = SMatrix<Scalar, 2, ERROR_DIM>;
type KalmanGain = SMatrix<Scalar, ERROR_DIM, 2>;

/// `det(S) / trace(S)^2` at or below this is treated as singular.
const MIN_INNOVATION_CONDITION: Scalar = 1e-12;

/// Horizontal position fix in the position sensor's frame (m).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PositionObservation {
    pub x: Scalar,
    pub y: Scalar,
}

impl PositionObservation {
    pub fn new(x: Scalar, y: Scalar) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObservationModel {
    /// Selects `δp_x, δp_y` from the error state.
    pub c: ObservationMatrix,
    pub r: Matrix2<Scalar>,
    /// Sensor frame -> estimator world frame.
    pub frame_rotation: UnitQuaternionr,
}

impl ObservationModel {
    pub fn new(r: Matrix2<Scalar>, frame_rotation: UnitQuaternionr) -> Self {
        let mut c = ObservationMatrix::zeros();
        c[(0, IDX_POSITION)] = 1.0;
        c[(1, IDX_POSITION + 1)] = 1.0;
        Self {
            c,
            r,
            frame_rotation,
        }
    }

    pub fn from_config(config: &FusionConfig) -> Self {
        Self::new(config.noise.observation_noise(), config.frame_rotation())
    }

    /// World-frame horizontal position measured by `observation`.
    pub fn measured(&self, observation: &PositionObservation) -> Vector2<Scalar> {
        let world = self.frame_rotation * Vector3r::new(observation.x, observation.y, 0.0);
        Vector2::new(world.x, world.y)
    }
}

/// Fuse one horizontal position observation into `state`/`covariance`.
///
/// Inputs are never modified; on failure the caller keeps its prior estimate.
pub fn correct(
    state: &NominalState,
    covariance: &ErrorCovariance,
    observation: &PositionObservation,
    model: &ObservationModel,
) -> FusionResult<(NominalState, ErrorCovariance)> {
    if !observation.is_finite() {
        return Err(FusionError::NonFiniteInput);
    }

    let c = &model.c;
    let predicted = Vector2::new(state.position.x, state.position.y);
    let innovation = model.measured(observation) - predicted;

    let s = c * covariance * c.transpose() + model.r;
    let determinant = s.determinant();
    let singular = FusionError::SingularInnovationCovariance { determinant };
    let trace = s.trace();
    if !determinant.is_finite() || determinant <= MIN_INNOVATION_CONDITION * trace * trace {
        return Err(singular);
    }
    let s_inv = match Cholesky::new(s) {
        Some(chol) => chol.inverse(),
        None => return Err(singular),
    };

    let k: KalmanGain = covariance * c.transpose() * s_inv;
    let dx = k * innovation;

    // Joseph form
    let i_minus_kc = ErrorCovariance::identity() - k * c;
    let p = i_minus_kc * covariance * i_minus_kc.transpose() + k * model.r * k.transpose();

    let next = state.boxplus(&dx);
    let p = symmetrize(&p);
    if !next.is_finite() || !p.iter().all(|v| v.is_finite()) {
        return Err(singular);
    }
    Ok((next, p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{asymmetry, block_diagonal_covariance, min_eigenvalue};
    use approx::assert_relative_eq;

    fn model() -> ObservationModel {
        ObservationModel::from_config(&FusionConfig::default())
    }

    #[test]
    fn test_zero_uncertainty_is_singular() {
        let m = ObservationModel::new(Matrix2::zeros(), UnitQuaternionr::identity());
        let err = correct(
            &NominalState::new(),
            &ErrorCovariance::zeros(),
            &PositionObservation::new(1.0, 0.5),
            &m,
        )
        .unwrap_err();
        match err {
            FusionError::SingularInnovationCovariance { determinant } => {
                assert!(!determinant.is_nan());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_small_but_well_conditioned_innovation_is_accepted() {
        let m = ObservationModel::new(Matrix2::identity() * 1e-7, UnitQuaternionr::identity());
        let mut p = ErrorCovariance::zeros();
        p[(IDX_POSITION, IDX_POSITION)] = 1e-8;
        p[(IDX_POSITION + 1, IDX_POSITION + 1)] = 1e-8;
        let (next, _) = correct(
            &NominalState::new(),
            &p,
            &PositionObservation::new(1e-3, 0.0),
            &m,
        )
        .unwrap();
        assert_relative_eq!(next.position.x, 1e-3 / 11.0, max_relative = 1e-9);
        assert_eq!(next.position.y, 0.0);
    }

    #[test]
    fn test_rank_deficient_innovation_is_singular() {
        let m = ObservationModel::new(Matrix2::zeros(), UnitQuaternionr::identity());
        let mut p = ErrorCovariance::zeros();
        for (r, c) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
            p[(IDX_POSITION + r, IDX_POSITION + c)] = 1.0;
        }
        let err = correct(
            &NominalState::new(),
            &p,
            &PositionObservation::new(1.0, 0.5),
            &m,
        )
        .unwrap_err();
        assert!(matches!(err, FusionError::SingularInnovationCovariance { .. }));
    }

    #[test]
    fn test_rejects_non_finite_observation() {
        let err = correct(
            &NominalState::new(),
            &ErrorCovariance::identity(),
            &PositionObservation::new(Scalar::INFINITY, 0.0),
            &model(),
        )
        .unwrap_err();
        assert_eq!(err, FusionError::NonFiniteInput);
    }

    /// With unit position variance and R = 0.01 the update moves the
    /// position most of the way to the fix, never past it.
    #[test]
    fn test_partial_pull_toward_observation() {
        let p = ErrorCovariance::identity();
        let (next, p_next) = correct(
            &NominalState::new(),
            &p,
            &PositionObservation::new(1.0, 0.5),
            &model(),
        )
        .unwrap();
        let gain = 1.0 / 1.01;
        assert_relative_eq!(next.position.x, gain, epsilon = 1e-12);
        assert_relative_eq!(next.position.y, 0.5 * gain, epsilon = 1e-12);
        assert!(next.position.x < 1.0);
        assert_eq!(next.position.z, 0.0);
        // Uncorrelated blocks are untouched.
        assert_relative_eq!(p_next[(6, 6)], 1.0, epsilon = 1e-12);
        assert!(p_next[(3, 3)] < p[(3, 3)]);
        assert_eq!(p_next[(5, 5)], 1.0);
    }

    #[test]
    fn test_frame_rotation_maps_observation() {
        // 90 degrees about z: sensor x becomes world y.
        let rot = UnitQuaternionr::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let m = ObservationModel::new(Matrix2::identity() * 0.01, rot);
        let z = m.measured(&PositionObservation::new(2.0, 0.0));
        assert_relative_eq!(z.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(z.y, 2.0, epsilon = 1e-12);
    }

    /// Position correlates with velocity, so a fix also corrects velocity.
    #[test]
    fn test_cross_covariance_spreads_correction() {
        let mut p = block_diagonal_covariance([0.1, 1.0, 1.0, 0.1, 0.01]);
        p[(3, 6)] = 0.5;
        p[(6, 3)] = 0.5;
        let (next, _) = correct(
            &NominalState::new(),
            &p,
            &PositionObservation::new(1.0, 0.0),
            &model(),
        )
        .unwrap();
        assert!(next.velocity.x > 0.0);
        assert_eq!(next.velocity.y, 0.0);
    }

    #[test]
    fn test_covariance_stays_symmetric_psd() {
        let mut p = block_diagonal_covariance([0.1, 1.0, 0.5, 0.2, 0.01]);
        p[(3, 7)] = 0.2;
        p[(7, 3)] = 0.2;
        p[(4, 0)] = 0.01;
        p[(0, 4)] = 0.01;
        let mut state = NominalState::new();
        for i in 0..50 {
            let obs = PositionObservation::new(0.1 * i as Scalar, -0.05 * i as Scalar);
            (state, p) = correct(&state, &p, &obs, &model()).unwrap();
            assert_eq!(asymmetry(&p), 0.0);
            assert!(min_eigenvalue(&p) >= -1e-12);
        }
        assert!((state.orientation.quaternion().norm() - 1.0).abs() < 1e-9);
    }
}
