//! 15-state Extended Kalman Filter for rocket state estimation.
//!
//! State layout (SPEC_FULL §3): `[px,py,pz, vx,vy,vz, qw,qx,qy,qz, bwx,bwy,bwz, baz, bp]`,
//! NED position/velocity, body-from-NED quaternion, gyro biases (rad/s),
//! accel Z-axis bias (m/s²), barometer bias (m).
//!
//! Grounded on `examples/original_source/backend/src/telemetry/kalman_filter.py`'s
//! `ExtendedKalmanFilter` — predict/update formulas, initial P/Q, and the
//! `_gps_to_ned` WGS-84 transform are reproduced exactly. Fixed-size
//! `nalgebra` matrices follow the idiom in
//! `other_examples/.../motion_tracker_rs-src-filters-ukf_15d.rs.rs`
//! (`SMatrix`/`SVector` for a fixed-dimension filter state).

use chrono::{DateTime, Utc};
use nalgebra::{SMatrix, SVector};
use telemetry_types::{FilterHealth, FilteredState, ParsedSample, Quality};
use tracing::{debug, info, warn};

use crate::config::EkfConfig;
use crate::error::TelemetryError;

type Vec15 = SVector<f64, 15>;
type Mat15 = SMatrix<f64, 15, 15>;
type Vec3 = SVector<f64, 3>;
type Mat3 = SMatrix<f64, 3, 3>;
type Vec4 = SVector<f64, 4>;
type H3 = SMatrix<f64, 3, 15>;

const GRAVITY_MPS2: f64 = 9.81;

/// Output of one EKF processing step. `filtered_state` is `None` only on
/// `FilterDivergence` (SPEC_FULL §7) — the caller still gets a record, with
/// `error` describing why.
pub struct EkfOutput {
    pub filtered_state: Option<FilteredState>,
    pub error: Option<String>,
}

pub struct ExtendedKalmanFilter {
    config: EkfConfig,
    state: Vec15,
    p: Mat15,
    q_diag: Vec15,
    r_gps: Mat3,
    r_accel: Mat3,
    r_baro: f64,
    r_mag: Mat3,
    last_update_time_s: Option<f64>,
}

impl ExtendedKalmanFilter {
    pub fn new(config: EkfConfig) -> Self {
        let mn = config.measurement_noise;
        let mut ekf = Self {
            config,
            state: Vec15::zeros(),
            p: Mat15::zeros(),
            q_diag: Vec15::zeros(),
            r_gps: Mat3::from_diagonal(&Vec3::new(mn.gps[0], mn.gps[1], mn.gps[2])),
            r_accel: Mat3::from_diagonal(&Vec3::new(mn.accel[0], mn.accel[1], mn.accel[2])),
            r_baro: mn.baro,
            r_mag: Mat3::from_diagonal(&Vec3::new(mn.mag[0], mn.mag[1], mn.mag[2])),
            last_update_time_s: None,
        };
        ekf.reset_to_initial(None);
        ekf
    }

    /// Re-initialize state/covariance, optionally snapping position to a
    /// GPS-derived NED fix (SPEC_FULL §4.3 Initialization).
    fn reset_to_initial(&mut self, initial_position_ned: Option<Vec3>) {
        self.state = Vec15::zeros();
        if let Some(pos) = initial_position_ned {
            self.state.fixed_rows_mut::<3>(0).copy_from(&pos);
        }
        self.state[6] = 1.0; // qw = 1, no rotation

        let ic = self.config.initial_covariance;
        let mut p = Mat15::identity();
        for i in 0..3 {
            p[(i, i)] = ic.position;
        }
        for i in 3..6 {
            p[(i, i)] = ic.velocity;
        }
        for i in 6..10 {
            p[(i, i)] = ic.quaternion;
        }
        for i in 10..13 {
            p[(i, i)] = ic.gyro_bias;
        }
        p[(13, 13)] = ic.accel_z_bias;
        p[(14, 14)] = ic.baro_bias;
        self.p = p;

        let pn = self.config.process_noise;
        let mut q_diag = Vec15::zeros();
        for i in 0..3 {
            q_diag[i] = pn.position;
        }
        for i in 3..6 {
            q_diag[i] = pn.velocity;
        }
        for i in 6..10 {
            q_diag[i] = pn.quaternion;
        }
        for i in 10..13 {
            q_diag[i] = pn.gyro_bias;
        }
        q_diag[13] = pn.accel_z_bias;
        q_diag[14] = pn.baro_bias;
        self.q_diag = q_diag;

        self.last_update_time_s = None;
    }

    fn predict(&mut self, dt: f64) {
        let vel: Vec3 = self.state.fixed_rows::<3>(3).into_owned();
        let new_pos = self.state.fixed_rows::<3>(0) + vel * dt;
        self.state.fixed_rows_mut::<3>(0).copy_from(&new_pos);

        let mut f = Mat15::identity();
        for i in 0..3 {
            f[(i, i + 3)] = dt;
        }
        self.p = f * self.p * f.transpose() + Mat15::from_diagonal(&self.q_diag) * dt;
        self.p = 0.5 * (self.p + self.p.transpose());
    }

    /// IMU update: orientation integration + velocity propagation + a
    /// measurement update against expected body-frame gravity (SPEC_FULL
    /// §4.3 IMU update, steps 1-5).
    fn update_imu(&mut self, accel_mps2: Vec3, gyro_rad_s: Vec3, dt: f64) -> Result<(), TelemetryError> {
        let gyro_bias: Vec3 = self.state.fixed_rows::<3>(10).into_owned();
        let gyro_corrected = gyro_rad_s - gyro_bias;

        let mut accel_corrected_body = accel_mps2;
        accel_corrected_body[2] -= self.state[13];

        self.integrate_quaternion(gyro_corrected, dt);

        let q = self.quaternion();
        let accel_ned = rotate_vector(accel_corrected_body, q);
        let true_accel_ned = accel_ned - Vec3::new(0.0, 0.0, GRAVITY_MPS2);
        let new_vel = self.state.fixed_rows::<3>(3) + true_accel_ned * dt;
        self.state.fixed_rows_mut::<3>(3).copy_from(&new_vel);

        let g_body = rotate_vector(Vec3::new(0.0, 0.0, GRAVITY_MPS2), quaternion_conjugate(q));
        let mut expected_accel_body = g_body;
        expected_accel_body[2] += self.state[13];

        let y = accel_mps2 - expected_accel_body;

        let mut h = H3::zeros();
        h[(2, 13)] = 1.0;

        self.measurement_update_3(h, self.r_accel, y, "imu")
    }

    fn update_gps(&mut self, latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Result<(), TelemetryError> {
        if !(-90.0..=90.0).contains(&latitude_deg) || !(-180.0..=180.0).contains(&longitude_deg) {
            return Err(TelemetryError::InvalidMeasurement {
                reason: format!("gps coordinates out of range: lat={latitude_deg}, lon={longitude_deg}"),
            });
        }

        let ned_pos = gps_to_ned(latitude_deg, longitude_deg, altitude_m, &self.config.reference);

        let mut h = H3::zeros();
        h.fixed_view_mut::<3, 3>(0, 0).copy_from(&Mat3::identity());

        let pos: Vec3 = self.state.fixed_rows::<3>(0).into_owned();
        let y = ned_pos - pos;

        self.measurement_update_3(h, self.r_gps, y, "gps")
    }

    /// Scalar barometer update: `altitude = -p_z + b_p` (SPEC_FULL §4.3).
    fn update_baro(&mut self, altitude_m: f64) -> Result<(), TelemetryError> {
        let mut h = Vec15::zeros();
        h[2] = -1.0;
        h[14] = 1.0;

        let z_expected = -self.state[2] + self.state[14];
        let y = altitude_m - z_expected;

        let ph = self.p * h;
        let s = h.dot(&ph) + self.r_baro;
        if s <= 1e-9 {
            return Err(TelemetryError::SingularInnovation { update: "baro" });
        }

        let k = ph / s;
        self.state += k * y;
        self.p -= k * ph.transpose();
        Ok(())
    }

    /// Magnetometer update. Source wires the innovation Jacobian to the
    /// quaternion vector components (x,y,z), not a real rotation
    /// linearization — preserved as-is (SPEC_FULL §4.3).
    fn update_mag(&mut self, mag_ut: Vec3) -> Result<(), TelemetryError> {
        let q = self.quaternion();
        let mag_body_expected = rotate_vector(self.config.mag_reference_ned.into(), q);
        let y = mag_ut - mag_body_expected;

        let mut h = H3::zeros();
        h.fixed_view_mut::<3, 3>(0, 6).copy_from(&Mat3::identity());

        self.measurement_update_3(h, self.r_mag, y, "mag")?;
        self.normalize_quaternion();
        Ok(())
    }

    fn measurement_update_3(
        &mut self,
        h: H3,
        r: Mat3,
        y: Vec3,
        update_name: &'static str,
    ) -> Result<(), TelemetryError> {
        let s = h * self.p * h.transpose() + r;
        let Some(s_inv) = s.try_inverse() else {
            return Err(TelemetryError::SingularInnovation { update: update_name });
        };

        let k = self.p * h.transpose() * s_inv;
        self.state += k * y;
        self.p = (Mat15::identity() - k * h) * self.p;

        if update_name == "imu" {
            self.normalize_quaternion();
        }
        Ok(())
    }

    fn integrate_quaternion(&mut self, gyro_rad_s: Vec3, dt: f64) {
        let q = self.quaternion();
        let omega_q = Vec4::new(0.0, gyro_rad_s[0], gyro_rad_s[1], gyro_rad_s[2]);
        let q_dot = quaternion_multiply(q, omega_q) * 0.5;
        let new_q = q + q_dot * dt;
        self.state.fixed_rows_mut::<4>(6).copy_from(&new_q);
        self.normalize_quaternion();
    }

    fn normalize_quaternion(&mut self) {
        let q = self.quaternion();
        let norm = q.norm();
        if norm > 1e-9 {
            self.state.fixed_rows_mut::<4>(6).copy_from(&(q / norm));
        }
    }

    fn quaternion(&self) -> Vec4 {
        self.state.fixed_rows::<4>(6).into_owned()
    }

    fn exposed_state(&self) -> (Vec3, Vec3, Vec4, Vec3) {
        let pos: Vec3 = self.state.fixed_rows::<3>(0).into_owned();
        let vel: Vec3 = self.state.fixed_rows::<3>(3).into_owned();
        let q = self.quaternion();
        let gyro_bias: Vec3 = self.state.fixed_rows::<3>(10).into_owned();
        (pos, vel, q, gyro_bias)
    }

    fn check_health(&self) -> FilterHealth {
        let state_finite = self.state.iter().all(|v| v.is_finite());
        let p_finite = self.p.iter().all(|v| v.is_finite());

        let covariance_symmetric = p_finite && (self.p - self.p.transpose()).norm() < 1e-9;

        let covariance_positive_definite = if p_finite && covariance_symmetric {
            match nalgebra::linalg::SymmetricEigen::try_new(self.p, 1e-12, 1000) {
                Some(eig) => eig.eigenvalues.iter().all(|&lambda| lambda > 1e-12),
                None => false,
            }
        } else {
            false
        };

        let quaternion_normalized = if state_finite {
            (self.quaternion().norm() - 1.0).abs() < 0.01
        } else {
            false
        };

        let is_healthy = state_finite
            && p_finite
            && covariance_symmetric
            && covariance_positive_definite
            && quaternion_normalized;

        let cov_diag = self.p.diagonal();
        let (position_uncertainty, velocity_uncertainty, max_uncertainty) = if p_finite {
            let pos_unc = [
                cov_diag[0].max(0.0).sqrt(),
                cov_diag[1].max(0.0).sqrt(),
                cov_diag[2].max(0.0).sqrt(),
            ];
            let vel_unc = [
                cov_diag[3].max(0.0).sqrt(),
                cov_diag[4].max(0.0).sqrt(),
                cov_diag[5].max(0.0).sqrt(),
            ];
            let max_unc = cov_diag.iter().cloned().fold(0.0_f64, f64::max).max(0.0).sqrt();
            (pos_unc, vel_unc, max_unc)
        } else {
            ([-1.0; 3], [-1.0; 3], -1.0)
        };

        FilterHealth {
            is_healthy,
            state_finite,
            p_finite,
            covariance_symmetric,
            covariance_positive_definite,
            quaternion_normalized,
            position_uncertainty,
            velocity_uncertainty,
            max_uncertainty,
        }
    }

    /// Advance the filter by one sample. Always returns a result — on
    /// `FilterDivergence` the state resets for the next call and
    /// `filtered_state` is `None` (SPEC_FULL §7).
    pub fn process(&mut self, sample: &ParsedSample, quality: &Quality) -> EkfOutput {
        let current_time_s = to_epoch_seconds(sample.timestamp);

        let dt = match self.last_update_time_s {
            None => {
                if quality.gps_valid {
                    let ned = gps_to_ned(
                        sample.latitude_deg,
                        sample.longitude_deg,
                        sample.altitude_m,
                        &self.config.reference,
                    );
                    self.reset_to_initial(Some(ned));
                    info!(?ned, "EKF initialized with GPS position");
                } else {
                    self.reset_to_initial(None);
                    info!("EKF initialized with default position (0,0,0)");
                }
                0.1
            }
            Some(last) => {
                let raw_dt = current_time_s - last;
                if raw_dt <= 0.0 || raw_dt > 1.0 {
                    let e = TelemetryError::ClockAnomaly { dt: raw_dt };
                    warn!(error = %e, "substituting 0.1s");
                    0.1
                } else {
                    raw_dt
                }
            }
        };
        self.last_update_time_s = Some(current_time_s);

        self.predict(dt);

        if let Some(imu) = &sample.imu {
            let accel = Vec3::new(imu.accel_mps2[0], imu.accel_mps2[1], imu.accel_mps2[2]);
            let gyro_rad = Vec3::new(
                imu.gyro_dps[0].to_radians(),
                imu.gyro_dps[1].to_radians(),
                imu.gyro_dps[2].to_radians(),
            );
            if let Err(e) = self.update_imu(accel, gyro_rad, dt) {
                debug!(error = %e, "imu update skipped");
            }
        } else {
            debug!("no imu sample, skipping imu update");
        }

        if quality.gps_valid {
            if let Err(e) = self.update_gps(sample.latitude_deg, sample.longitude_deg, sample.altitude_m) {
                debug!(error = %e, "gps update skipped");
            }
        }

        if let Err(e) = self.update_baro(sample.altitude_m) {
            debug!(error = %e, "baro update skipped");
        }

        if quality.mag_valid {
            if let Some(mag) = &sample.mag {
                let mag_vec = Vec3::new(mag.mag_ut[0], mag.mag_ut[1], mag.mag_ut[2]);
                if let Err(e) = self.update_mag(mag_vec) {
                    debug!(error = %e, "mag update skipped");
                }
            }
        }

        let health = self.check_health();
        if !health.state_finite || !health.p_finite {
            warn!("EKF diverged, resetting for next sample");
            self.reset_to_initial(None);
            return EkfOutput {
                filtered_state: None,
                error: Some("filter divergence: state or covariance non-finite".to_string()),
            };
        }
        if !health.is_healthy {
            warn!(?health, "EKF unhealthy");
        }

        let (pos, vel, q, gyro_bias) = self.exposed_state();
        let euler = quaternion_to_euler(q);

        let filtered_state = FilteredState {
            position_ned: [pos[0], pos[1], pos[2]],
            velocity_ned: [vel[0], vel[1], vel[2]],
            quaternion: [q[0], q[1], q[2], q[3]],
            euler_angles_deg: [euler[0].to_degrees(), euler[1].to_degrees(), euler[2].to_degrees()],
            gyro_bias_rad_s: [gyro_bias[0], gyro_bias[1], gyro_bias[2]],
            accel_z_bias_mps2: self.state[13],
            baro_bias_m: self.state[14],
            altitude: -pos[2],
            speed: vel.norm(),
            vertical_velocity: -vel[2],
            covariance_diagonal: self.p.diagonal().into(),
            filter_health: health,
        };

        EkfOutput {
            filtered_state: Some(filtered_state),
            error: None,
        }
    }
}

fn to_epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + ts.timestamp_subsec_nanos() as f64 * 1e-9
}

fn quaternion_multiply(q1: Vec4, q2: Vec4) -> Vec4 {
    let (w1, x1, y1, z1) = (q1[0], q1[1], q1[2], q1[3]);
    let (w2, x2, y2, z2) = (q2[0], q2[1], q2[2], q2[3]);
    Vec4::new(
        w1 * w2 - x1 * x2 - y1 * y2 - z1 * z2,
        w1 * x2 + x1 * w2 + y1 * z2 - z1 * y2,
        w1 * y2 - x1 * z2 + y1 * w2 + z1 * x2,
        w1 * z2 + x1 * y2 - y1 * x2 + z1 * w2,
    )
}

fn quaternion_conjugate(q: Vec4) -> Vec4 {
    Vec4::new(q[0], -q[1], -q[2], -q[3])
}

fn rotate_vector(v: Vec3, q: Vec4) -> Vec3 {
    let v_q = Vec4::new(0.0, v[0], v[1], v[2]);
    let rotated = quaternion_multiply(quaternion_multiply(q, v_q), quaternion_conjugate(q));
    Vec3::new(rotated[1], rotated[2], rotated[3])
}

/// Standard Z-Y-X Euler angles (roll, pitch, yaw), radians.
fn quaternion_to_euler(q: Vec4) -> Vec3 {
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);

    let sinr_cosp = 2.0 * (w * x + y * z);
    let cosr_cosp = 1.0 - 2.0 * (x * x + y * y);
    let roll = sinr_cosp.atan2(cosr_cosp);

    let sinp = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0);
    let pitch = sinp.asin();

    let siny_cosp = 2.0 * (w * z + x * y);
    let cosy_cosp = 1.0 - 2.0 * (y * y + z * z);
    let yaw = siny_cosp.atan2(cosy_cosp);

    Vec3::new(roll, pitch, yaw)
}

/// Geodetic lat/lon/alt to local NED relative to `reference`, via the
/// WGS-84 geodetic→ECEF transform followed by ECEF→NED rotation
/// (SPEC_FULL §4.3, reproduced exactly from `_gps_to_ned`).
fn gps_to_ned(
    latitude_deg: f64,
    longitude_deg: f64,
    altitude_m: f64,
    reference: &telemetry_types::GeodeticRef,
) -> Vec3 {
    const A: f64 = 6_378_137.0;
    const F: f64 = 1.0 / 298.257223563;
    let e_sq = F * (2.0 - F);

    let ref_lat_rad = reference.lat_deg.to_radians();
    let ref_lon_rad = reference.lon_deg.to_radians();
    let ref_alt = reference.alt_m;

    let lat_rad = latitude_deg.to_radians();
    let lon_rad = longitude_deg.to_radians();

    let n_ref = A / (1.0 - e_sq * ref_lat_rad.sin().powi(2)).sqrt();
    let n_curr = A / (1.0 - e_sq * lat_rad.sin().powi(2)).sqrt();

    let x_ref = (n_ref + ref_alt) * ref_lat_rad.cos() * ref_lon_rad.cos();
    let y_ref = (n_ref + ref_alt) * ref_lat_rad.cos() * ref_lon_rad.sin();
    let z_ref = (n_ref * (1.0 - e_sq) + ref_alt) * ref_lat_rad.sin();

    let x_curr = (n_curr + altitude_m) * lat_rad.cos() * lon_rad.cos();
    let y_curr = (n_curr + altitude_m) * lat_rad.cos() * lon_rad.sin();
    let z_curr = (n_curr * (1.0 - e_sq) + altitude_m) * lat_rad.sin();

    let d = Vec3::new(x_curr - x_ref, y_curr - y_ref, z_curr - z_ref);

    let (sin_lat_ref, cos_lat_ref) = (ref_lat_rad.sin(), ref_lat_rad.cos());
    let (sin_lon_ref, cos_lon_ref) = (ref_lon_rad.sin(), ref_lon_rad.cos());

    let r_ecef_to_ned = Mat3::new(
        -sin_lat_ref * cos_lon_ref,
        -sin_lat_ref * sin_lon_ref,
        cos_lat_ref,
        -sin_lon_ref,
        cos_lon_ref,
        0.0,
        -cos_lat_ref * cos_lon_ref,
        -cos_lat_ref * sin_lon_ref,
        -sin_lat_ref,
    );

    r_ecef_to_ned * d
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use telemetry_types::{ImuSample, TelemetryMode};

    fn cfg() -> EkfConfig {
        EkfConfig::default()
    }

    fn armed_sample_at(t_offset_ms: i64, altitude_m: f64, gps_valid: bool) -> ParsedSample {
        let reference = telemetry_types::GeodeticRef::default();
        ParsedSample {
            mode: TelemetryMode::Armed,
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000 + t_offset_ms).unwrap(),
            packet_id: t_offset_ms as u64,
            altitude_m,
            imu: Some(ImuSample {
                accel_mps2: [0.0, 0.0, 9.81],
                gyro_dps: [0.0, 0.0, 0.0],
                accel_magnitude_mps2: 9.81,
                accel_magnitude_g: 1.0,
                gyro_magnitude_dps: 0.0,
            }),
            mag: None,
            latitude_deg: if gps_valid { reference.lat_deg } else { 0.0 },
            longitude_deg: if gps_valid { reference.lon_deg } else { 0.0 },
            gps_satellites: if gps_valid { 8 } else { 0 },
            temperature_c: 20.0,
        }
    }

    fn quality_of(sample: &ParsedSample) -> Quality {
        Quality {
            gps_valid: sample.gps_satellites >= 4,
            imu_valid: true,
            mag_valid: false,
            baro_valid: true,
            temp_valid: true,
            overall_valid: sample.gps_satellites >= 4,
        }
    }

    fn quality_no_gps() -> Quality {
        Quality {
            gps_valid: false,
            imu_valid: true,
            mag_valid: false,
            baro_valid: true,
            temp_valid: true,
            overall_valid: false,
        }
    }

    /// Seed scenario 1 (SPEC_FULL §8): stationary on pad with a valid GPS
    /// fix and barometer reading both pinned at the reference altitude.
    #[test]
    fn stationary_on_pad_converges_to_known_altitude() {
        let mut ekf = ExtendedKalmanFilter::new(cfg());
        let reference = telemetry_types::GeodeticRef::default();
        let mut last = None;
        for step in 0..100 {
            let sample = armed_sample_at(step * 100, reference.alt_m, true);
            let quality = quality_of(&sample);
            let out = ekf.process(&sample, &quality);
            last = out.filtered_state;
        }
        let fs = last.expect("filter stayed healthy");
        assert!(
            (fs.altitude - reference.alt_m).abs() < 1.0,
            "altitude {} did not converge to {}",
            fs.altitude,
            reference.alt_m
        );
        assert!(fs.speed < 0.5, "speed drifted to {}", fs.speed);
    }

    fn armed_sample_ms(t_offset_ms: i64, gyro_z_dps: f64) -> ParsedSample {
        ParsedSample {
            mode: TelemetryMode::Armed,
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000 + t_offset_ms).unwrap(),
            packet_id: t_offset_ms as u64,
            altitude_m: 0.0,
            imu: Some(ImuSample {
                accel_mps2: [0.0, 0.0, 9.81],
                gyro_dps: [0.0, 0.0, gyro_z_dps],
                accel_magnitude_mps2: 9.81,
                accel_magnitude_g: 1.0,
                gyro_magnitude_dps: gyro_z_dps.abs(),
            }),
            mag: None,
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            gps_satellites: 0,
            temperature_c: 20.0,
        }
    }

    #[test]
    fn pure_yaw_rotation_produces_expected_euler_yaw() {
        let mut ekf = ExtendedKalmanFilter::new(cfg());
        // Prime dt with a first sample (assumed 0.1s internally).
        ekf.process(&armed_sample_ms(0, 0.0), &quality_no_gps());

        let mut out = None;
        // 1 second total, 10 steps of 0.1s, body yaw rate 90 deg/s.
        for step in 1..=10 {
            let sample = armed_sample_ms(step * 100, 90.0);
            out = Some(ekf.process(&sample, &quality_no_gps()));
        }
        let fs = out.unwrap().filtered_state.expect("finite state");
        assert!(
            (fs.euler_angles_deg[2].abs() - 90.0).abs() < 5.0,
            "expected yaw near 90 deg, got {}",
            fs.euler_angles_deg[2]
        );
    }

    fn custom_armed_sample(t_offset_ms: i64, accel: [f64; 3], gyro: [f64; 3], altitude_m: f64) -> ParsedSample {
        let accel_mag = (accel[0] * accel[0] + accel[1] * accel[1] + accel[2] * accel[2]).sqrt();
        ParsedSample {
            mode: TelemetryMode::Armed,
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000 + t_offset_ms).unwrap(),
            packet_id: t_offset_ms as u64,
            altitude_m,
            imu: Some(ImuSample {
                accel_mps2: accel,
                gyro_dps: gyro,
                accel_magnitude_mps2: accel_mag,
                accel_magnitude_g: accel_mag / 9.81,
                gyro_magnitude_dps: (gyro[0] * gyro[0] + gyro[1] * gyro[1] + gyro[2] * gyro[2]).sqrt(),
            }),
            mag: None,
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            gps_satellites: 0,
            temperature_c: 20.0,
        }
    }

    #[test]
    fn quaternion_stays_normalized_after_updates() {
        let mut ekf = ExtendedKalmanFilter::new(cfg());
        for t in 0..50 {
            let sample = custom_armed_sample(t * 100, [0.1, 0.2, 9.7], [1.0, -1.0, 2.0], 100.0 + t as f64);
            let out = ekf.process(&sample, &quality_no_gps());
            let fs = out.filtered_state.expect("finite state");
            let norm: f64 = fs
                .quaternion
                .iter()
                .map(|v| v * v)
                .sum::<f64>()
                .sqrt();
            assert!((norm - 1.0).abs() < 1e-6, "quaternion norm drifted: {norm}");
        }
    }

    #[test]
    fn altitude_identically_negative_z_position() {
        let mut ekf = ExtendedKalmanFilter::new(cfg());
        let sample = custom_armed_sample(0, [0.0, 0.0, 9.81], [0.0, 0.0, 0.0], 123.4);
        let out = ekf.process(&sample, &quality_no_gps());
        let fs = out.filtered_state.unwrap();
        assert!((fs.altitude - (-fs.position_ned[2])).abs() < 1e-12);
    }

    #[test]
    fn gps_to_ned_at_reference_point_is_zero() {
        let reference = telemetry_types::GeodeticRef {
            lat_deg: 25.997222,
            lon_deg: -97.155556,
            alt_m: 8.0,
        };
        let ned = gps_to_ned(25.997222, -97.155556, 8.0, &reference);
        assert!(ned.norm() < 1e-6);
    }
}
