use nalgebra::Vector3;
use uwbfuse_core::FusionConfig;
use uwbfuse_sim::{generate_events, run_scenario, CircleTrajectory, SensorConfig};

fn rms_for(sensors: &SensorConfig, config: FusionConfig) -> f64 {
    let traj = CircleTrajectory::default();
    let events = generate_events(&traj, 4.0, sensors).unwrap();
    let result = run_scenario(&events, &traj, config, traj.nominal_state(0.0)).unwrap();
    assert_eq!(result.statuses.rejected, 0);
    result.rms_horizontal_error()
}

#[test]
fn test_tracks_across_latencies() {
    for latency in [0.0, 0.01, 0.05, 0.1] {
        let sensors = SensorConfig {
            uwb_latency_s: latency,
            ..SensorConfig::default()
        };
        let rms = rms_for(&sensors, FusionConfig::default());
        assert!(rms < 0.3, "latency {latency}: rms {rms}");
    }
}

#[test]
fn test_tracks_with_rotated_uwb_frame() {
    let config = FusionConfig {
        frame_rotation: [0.7071, 0.0, 0.0, -0.7071],
        ..FusionConfig::default()
    };
    let sensors = SensorConfig {
        uwb_frame: config.frame_rotation().inverse(),
        ..SensorConfig::default()
    };
    let rms = rms_for(&sensors, config);
    assert!(rms < 0.3, "rms {rms}");
}

#[test]
fn test_tracks_with_small_sensor_biases() {
    let sensors = SensorConfig {
        accel_bias: Vector3::new(0.05, -0.03, 0.0),
        gyro_bias: Vector3::new(0.0, 0.0, 0.005),
        ..SensorConfig::default()
    };
    let rms = rms_for(&sensors, FusionConfig::default());
    assert!(rms < 0.3, "rms {rms}");
}

#[test]
fn test_same_seed_gives_same_result() {
    let sensors = SensorConfig::default();
    let a = rms_for(&sensors, FusionConfig::default());
    let b = rms_for(&sensors, FusionConfig::default());
    assert_eq!(a, b);
}
