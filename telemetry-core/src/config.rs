//! Pipeline configuration.
//!
//! Unlike the teacher's `backend-rust`, which loads server config from the
//! environment (host/port/CORS origin), the core takes no environment
//! variables, files, or network endpoints (SPEC_FULL §6) — `Config` is a
//! plain value the embedding application constructs, typically via
//! `Config::default()` with targeted overrides.

use telemetry_types::GeodeticRef;

/// Validator data-quality gates (SPEC_FULL §4.2).
#[derive(Debug, Clone, Copy)]
pub struct ValidatorThresholds {
    pub accel_max_g: f64,
    pub gyro_max_dps: f64,
    pub mag_min_ut: f64,
    pub mag_max_ut: f64,
    pub altitude_min_m: f64,
    pub altitude_max_m: f64,
    pub temp_min_c: f64,
    pub temp_max_c: f64,
}

impl Default for ValidatorThresholds {
    fn default() -> Self {
        Self {
            accel_max_g: 20.0,
            gyro_max_dps: 2000.0,
            mag_min_ut: 10.0,
            mag_max_ut: 100.0,
            altitude_min_m: -1000.0,
            altitude_max_m: 50000.0,
            temp_min_c: -40.0,
            temp_max_c: 85.0,
        }
    }
}

/// Initial-covariance diagonal, grouped by state block (SPEC_FULL §4.3
/// Initialization). Overriding these reshapes how quickly each block's
/// uncertainty is "trusted away" by early measurement updates.
#[derive(Debug, Clone, Copy)]
pub struct InitialCovariance {
    pub position: f64,
    pub velocity: f64,
    pub quaternion: f64,
    pub gyro_bias: f64,
    pub accel_z_bias: f64,
    pub baro_bias: f64,
}

impl Default for InitialCovariance {
    fn default() -> Self {
        Self {
            position: 10.0,
            velocity: 5.0,
            quaternion: 0.1,
            gyro_bias: 0.01,
            accel_z_bias: 0.1,
            baro_bias: 5.0,
        }
    }
}

/// Process-noise diagonal, scaled by `dt` at every predict step
/// (SPEC_FULL §4.3 Initialization).
#[derive(Debug, Clone, Copy)]
pub struct ProcessNoise {
    pub position: f64,
    pub velocity: f64,
    pub quaternion: f64,
    pub gyro_bias: f64,
    pub accel_z_bias: f64,
    pub baro_bias: f64,
}

impl Default for ProcessNoise {
    fn default() -> Self {
        Self {
            position: 0.1,
            velocity: 1.0,
            quaternion: 0.01,
            gyro_bias: 1e-6,
            accel_z_bias: 1e-4,
            baro_bias: 1e-3,
        }
    }
}

/// Measurement-noise models for the four independent updates
/// (SPEC_FULL §4.3).
#[derive(Debug, Clone, Copy)]
pub struct MeasurementNoise {
    /// GPS position, NED, diag(m²).
    pub gps: [f64; 3],
    /// IMU accel innovation, body, diag((m/s²)²).
    pub accel: [f64; 3],
    /// Barometer altitude, scalar, m².
    pub baro: f64,
    /// Magnetometer, body, diag(µT²).
    pub mag: [f64; 3],
}

impl Default for MeasurementNoise {
    fn default() -> Self {
        Self {
            gps: [5.0, 5.0, 10.0],
            accel: [0.05, 0.05, 0.05],
            baro: 2.0,
            mag: [0.5, 0.5, 0.5],
        }
    }
}

/// EKF noise-model and reference-point tuning (SPEC_FULL §4.3, §6).
#[derive(Debug, Clone, Copy)]
pub struct EkfConfig {
    /// NED origin for GPS-to-local conversion.
    pub reference: GeodeticRef,
    /// Reference magnetic field, NED, µT.
    pub mag_reference_ned: [f64; 3],
    pub initial_covariance: InitialCovariance,
    pub process_noise: ProcessNoise,
    pub measurement_noise: MeasurementNoise,
}

impl Default for EkfConfig {
    fn default() -> Self {
        Self {
            reference: GeodeticRef::default(),
            mag_reference_ned: [20.0, -30.0, 40.0],
            initial_covariance: InitialCovariance::default(),
            process_noise: ProcessNoise::default(),
            measurement_noise: MeasurementNoise::default(),
        }
    }
}

/// Event-detector tunables (SPEC_FULL §4.4).
#[derive(Debug, Clone, Copy)]
pub struct EventDetectorConfig {
    pub launch_accel_threshold_g: f64,
    pub launch_min_duration_s: f64,
    pub burnout_accel_drop_threshold_g: f64,
    pub apogee_velocity_threshold_mps: f64,
    pub landing_altitude_threshold_m: f64,
    pub landed_max_velocity_mps: f64,
    pub landed_accel_std_g: f64,
    /// Half-width of the apogee detection window, seconds. Default 5.
    pub apogee_window_half_width_s: f64,
}

impl Default for EventDetectorConfig {
    fn default() -> Self {
        Self {
            launch_accel_threshold_g: 2.0,
            launch_min_duration_s: 0.3,
            burnout_accel_drop_threshold_g: 1.5,
            apogee_velocity_threshold_mps: 0.5,
            landing_altitude_threshold_m: 20.0,
            landed_max_velocity_mps: 0.5,
            landed_accel_std_g: 0.1,
            apogee_window_half_width_s: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    pub validator: ValidatorThresholds,
    pub ekf: EkfConfig,
    pub event_detector: EventDetectorConfig,
}
