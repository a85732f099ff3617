//! Startup configuration. Loaded once, validated, immutable afterwards.

use crate::error::ConfigError;
use crate::history::HistoryCapacity;
use crate::state::{block_diagonal_covariance, ErrorCovariance, Scalar, UnitQuaternionr, Vector3r};
use nalgebra::{Matrix2, Quaternion, SMatrix};
use serde::{Deserialize, Serialize};

pub const STANDARD_GRAVITY: Scalar = 9.80665;

/// 12x12 input noise covariance over `[n_gyro, n_accel, n_accel_bias, n_gyro_bias]`.
pub type ProcessNoise = SMatrix<Scalar, 12, 12>;

// ---------------------------------------------------------------------------
// NOISE TUNING
// ---------------------------------------------------------------------------

/// Noise variances. Each process term scales a 3x3 identity block.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseTuning {
    pub gyro_noise: Scalar,
    pub accel_noise: Scalar,
    pub accel_bias_walk: Scalar,
    pub gyro_bias_walk: Scalar,
    /// Horizontal position observation variance (m²).
    pub r_position: Scalar,
}

impl Default for NoiseTuning {
    fn default() -> Self {
        Self {
            gyro_noise: 0.01,
            accel_noise: 0.01,
            accel_bias_walk: 0.01,
            gyro_bias_walk: 0.01,
            r_position: 0.01,
        }
    }
}

impl NoiseTuning {
    pub fn process_noise(&self) -> ProcessNoise {
        let mut q = ProcessNoise::zeros();
        q.fixed_view_mut::<3, 3>(0, 0).fill_diagonal(self.gyro_noise);
        q.fixed_view_mut::<3, 3>(3, 3).fill_diagonal(self.accel_noise);
        q.fixed_view_mut::<3, 3>(6, 6)
            .fill_diagonal(self.accel_bias_walk);
        q.fixed_view_mut::<3, 3>(9, 9)
            .fill_diagonal(self.gyro_bias_walk);
        q
    }

    pub fn observation_noise(&self) -> Matrix2<Scalar> {
        Matrix2::identity() * self.r_position
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("gyro_noise", self.gyro_noise),
            ("accel_noise", self.accel_noise),
            ("accel_bias_walk", self.accel_bias_walk),
            ("gyro_bias_walk", self.gyro_bias_walk),
            ("r_position", self.r_position),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidNoise { name, value });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// INITIAL UNCERTAINTY
// ---------------------------------------------------------------------------

/// 1-sigma of the initial error state, per block.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialUncertainty {
    pub orientation: Scalar,
    pub position: Scalar,
    pub velocity: Scalar,
    pub accel_bias: Scalar,
    pub gyro_bias: Scalar,
}

impl Default for InitialUncertainty {
    fn default() -> Self {
        Self {
            orientation: 0.1,
            position: 1.0,
            velocity: 0.5,
            accel_bias: 0.2,
            gyro_bias: 0.01,
        }
    }
}

impl InitialUncertainty {
    pub fn covariance(&self) -> ErrorCovariance {
        block_diagonal_covariance([
            self.orientation,
            self.position,
            self.velocity,
            self.accel_bias,
            self.gyro_bias,
        ])
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("initial.orientation", self.orientation),
            ("initial.position", self.position),
            ("initial.velocity", self.velocity),
            ("initial.accel_bias", self.accel_bias),
            ("initial.gyro_bias", self.gyro_bias),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidSigma { name, value });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FUSION CONFIG
// ---------------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub noise: NoiseTuning,
    pub initial: InitialUncertainty,
    /// Gravity in the world frame (m/s²).
    pub gravity: [Scalar; 3],
    /// Rotation taking position-sensor frame vectors into the world frame, `[w, x, y, z]`.
    pub frame_rotation: [Scalar; 4],
    pub history: HistoryCapacity,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            noise: NoiseTuning::default(),
            initial: InitialUncertainty::default(),
            gravity: [0.0, 0.0, -STANDARD_GRAVITY],
            frame_rotation: [1.0, 0.0, 0.0, 0.0],
            history: HistoryCapacity::default(),
        }
    }
}

impl FusionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Plain arrays and floats always serialize.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.noise.validate()?;
        self.initial.validate()?;

        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(ConfigError::InvalidGravity);
        }

        let [w, x, y, z] = self.frame_rotation;
        let norm = Quaternion::new(w, x, y, z).norm();
        if !norm.is_finite() || norm < 1e-9 {
            return Err(ConfigError::InvalidFrameRotation);
        }

        if self.history.max_entries == 0 {
            return Err(ConfigError::EmptyHistory);
        }
        if let Some(span) = self.history.max_span_s {
            if !span.is_finite() || span <= 0.0 {
                return Err(ConfigError::InvalidHistorySpan(span));
            }
        }
        Ok(())
    }

    pub fn gravity_vector(&self) -> Vector3r {
        Vector3r::from(self.gravity)
    }

    pub fn frame_rotation(&self) -> UnitQuaternionr {
        let [w, x, y, z] = self.frame_rotation;
        UnitQuaternionr::new_normalize(Quaternion::new(w, x, y, z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config_is_valid() {
        FusionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = FusionConfig::from_json_str(
            r#"{ "noise": { "r_position": 0.04 }, "history": { "max_entries": 50 } }"#,
        )
        .unwrap();
        assert_eq!(config.noise.r_position, 0.04);
        assert_eq!(config.noise.gyro_noise, NoiseTuning::default().gyro_noise);
        assert_eq!(config.history.max_entries, 50);
        assert_eq!(config.gravity, [0.0, 0.0, -STANDARD_GRAVITY]);
    }

    #[test]
    fn test_json_roundtrip_preserves_config() {
        let mut config = FusionConfig::default();
        config.frame_rotation = [0.7071, 0.0, 0.0, -0.7071];
        config.history.max_span_s = Some(0.5);
        let json = config.to_json().to_string();
        let back = FusionConfig::from_json_str(&json).unwrap();
        for (a, b) in back.frame_rotation.iter().zip(config.frame_rotation.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
        assert_relative_eq!(back.gravity[2], config.gravity[2], epsilon = 1e-12);
        assert_eq!(back.history.max_entries, config.history.max_entries);
        assert_eq!(back.history.max_span_s, Some(0.5));
    }

    #[test]
    fn test_rejects_negative_noise() {
        let err = FusionConfig::from_json_str(r#"{ "noise": { "accel_noise": -1.0 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNoise {
                name: "accel_noise",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_degenerate_frame_rotation() {
        let config = FusionConfig {
            frame_rotation: [0.0; 4],
            ..FusionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFrameRotation)
        ));
    }

    #[test]
    fn test_rejects_empty_history() {
        let mut config = FusionConfig::default();
        config.history.max_entries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::EmptyHistory)));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            FusionConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_process_noise_blocks() {
        let tuning = NoiseTuning {
            gyro_noise: 1.0,
            accel_noise: 2.0,
            accel_bias_walk: 3.0,
            gyro_bias_walk: 4.0,
            r_position: 5.0,
        };
        let q = tuning.process_noise();
        assert_eq!(q[(2, 2)], 1.0);
        assert_eq!(q[(5, 5)], 2.0);
        assert_eq!(q[(8, 8)], 3.0);
        assert_eq!(q[(11, 11)], 4.0);
        assert_eq!(q[(0, 1)], 0.0);
        assert_eq!(tuning.observation_noise()[(1, 1)], 5.0);
    }

    #[test]
    fn test_frame_rotation_is_normalized() {
        let config = FusionConfig {
            frame_rotation: [0.7071, 0.0, 0.0, -0.7071],
            ..FusionConfig::default()
        };
        let r = config.frame_rotation();
        assert_relative_eq!(r.quaternion().norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(r.angle(), std::f64::consts::FRAC_PI_2, epsilon = 1e-4);
    }
}
