//! Per-subsystem data-quality validation.
//!
//! Grounded on `examples/original_source/backend/src/telemetry/validation.py`'s
//! `DataValidator` — same five subsystem checks, same "missing subsystem is
//! vacuously valid" rule, same running-counter shape (SPEC_FULL §4.2).

use telemetry_types::{ParsedSample, Quality};

use crate::config::ValidatorThresholds;

/// Snapshot of validator counters, safe to read from outside the pipeline
/// task (SPEC_FULL §5).
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatorStats {
    pub total_packets: u64,
    pub valid_packets: u64,
    pub gps_failures: u64,
    pub sensor_failures: u64,
}

pub struct DataValidator {
    thresholds: ValidatorThresholds,
    total_packets: u64,
    valid_packets: u64,
    gps_failures: u64,
    sensor_failures: u64,
}

impl DataValidator {
    pub fn new(thresholds: ValidatorThresholds) -> Self {
        Self {
            thresholds,
            total_packets: 0,
            valid_packets: 0,
            gps_failures: 0,
            sensor_failures: 0,
        }
    }

    pub fn stats(&self) -> ValidatorStats {
        ValidatorStats {
            total_packets: self.total_packets,
            valid_packets: self.valid_packets,
            gps_failures: self.gps_failures,
            sensor_failures: self.sensor_failures,
        }
    }

    pub fn validate(&mut self, sample: &ParsedSample) -> Quality {
        self.total_packets += 1;

        let gps_valid = self.validate_gps(sample);
        let imu_valid = self.validate_imu(sample);
        let mag_valid = validate_mag(sample, &self.thresholds);
        let baro_valid = validate_baro(sample, &self.thresholds);
        let temp_valid = validate_temp(sample, &self.thresholds);

        let overall_valid = gps_valid && imu_valid && mag_valid && baro_valid && temp_valid;
        if overall_valid {
            self.valid_packets += 1;
        }

        Quality {
            gps_valid,
            imu_valid,
            mag_valid,
            baro_valid,
            temp_valid,
            overall_valid,
        }
    }

    /// GPS is vacuously valid for Recovery packets too — the source only
    /// skips the check when lat/lon fields are absent from the dict, but
    /// every `ParsedSample` carries lat/lon, so the no-fix/range/satellite
    /// checks below are the effective gate for both modes.
    fn validate_gps(&mut self, sample: &ParsedSample) -> bool {
        let lat = sample.latitude_deg;
        let lon = sample.longitude_deg;

        if !lat.is_finite() || !lon.is_finite() {
            return false;
        }

        if lat.abs() < 1e-5 && lon.abs() < 1e-5 {
            self.gps_failures += 1;
            return false;
        }

        if !(-90.0..=90.0).contains(&lat) {
            return false;
        }
        if !(-180.0..=180.0).contains(&lon) {
            return false;
        }

        if sample.gps_satellites < 4 {
            return false;
        }

        true
    }

    fn validate_imu(&mut self, sample: &ParsedSample) -> bool {
        let Some(imu) = &sample.imu else {
            return true;
        };

        let max_accel = self.thresholds.accel_max_g * 9.81;
        for a in imu.accel_mps2 {
            if a.abs() > max_accel {
                self.sensor_failures += 1;
                return false;
            }
        }
        for g in imu.gyro_dps {
            if g.abs() > self.thresholds.gyro_max_dps {
                self.sensor_failures += 1;
                return false;
            }
        }
        true
    }
}

fn validate_mag(sample: &ParsedSample, thresholds: &ValidatorThresholds) -> bool {
    let Some(mag) = &sample.mag else {
        return true;
    };

    if mag.mag_ut.iter().all(|&v| v == 0.0) {
        return false;
    }

    (thresholds.mag_min_ut..=thresholds.mag_max_ut).contains(&mag.mag_magnitude_ut)
}

fn validate_baro(sample: &ParsedSample, thresholds: &ValidatorThresholds) -> bool {
    (thresholds.altitude_min_m..=thresholds.altitude_max_m).contains(&sample.altitude_m)
}

fn validate_temp(sample: &ParsedSample, thresholds: &ValidatorThresholds) -> bool {
    (thresholds.temp_min_c..=thresholds.temp_max_c).contains(&sample.temperature_c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use telemetry_types::{ImuSample, MagSample, TelemetryMode};

    fn base_sample() -> ParsedSample {
        ParsedSample {
            mode: TelemetryMode::Armed,
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            packet_id: 0,
            altitude_m: 100.0,
            imu: Some(ImuSample {
                accel_mps2: [0.0, 0.0, 9.81],
                gyro_dps: [0.0, 0.0, 0.0],
                accel_magnitude_mps2: 9.81,
                accel_magnitude_g: 1.0,
                gyro_magnitude_dps: 0.0,
            }),
            mag: Some(MagSample {
                mag_ut: [20.0, 0.0, 0.0],
                mag_magnitude_ut: 20.0,
            }),
            latitude_deg: 28.396837,
            longitude_deg: -80.605659,
            gps_satellites: 8,
            temperature_c: 22.0,
        }
    }

    #[test]
    fn overall_valid_is_conjunction_of_subsystems() {
        let mut v = DataValidator::new(ValidatorThresholds::default());
        let q = v.validate(&base_sample());
        assert!(q.gps_valid && q.imu_valid && q.mag_valid && q.baro_valid && q.temp_valid);
        assert!(q.overall_valid);
    }

    #[test]
    fn no_fix_sentinel_fails_gps() {
        let mut v = DataValidator::new(ValidatorThresholds::default());
        let mut s = base_sample();
        s.latitude_deg = 0.0;
        s.longitude_deg = 0.0;
        let q = v.validate(&s);
        assert!(!q.gps_valid);
        assert!(!q.overall_valid);
        assert_eq!(v.stats().gps_failures, 1);
    }

    #[test]
    fn satellite_boundary_four_valid_three_invalid() {
        let mut v = DataValidator::new(ValidatorThresholds::default());
        let mut s = base_sample();
        s.gps_satellites = 4;
        assert!(v.validate(&s).gps_valid);

        s.gps_satellites = 3;
        assert!(!v.validate(&s).gps_valid);
    }

    #[test]
    fn altitude_boundary_at_max_is_valid_one_above_is_not() {
        let mut v = DataValidator::new(ValidatorThresholds::default());
        let mut s = base_sample();
        s.altitude_m = 50000.0;
        assert!(v.validate(&s).baro_valid);

        s.altitude_m = 50000.0 + 1.0;
        assert!(!v.validate(&s).baro_valid);
    }

    #[test]
    fn all_zero_magnetometer_is_invalid() {
        let mut v = DataValidator::new(ValidatorThresholds::default());
        let mut s = base_sample();
        s.mag = Some(MagSample {
            mag_ut: [0.0, 0.0, 0.0],
            mag_magnitude_ut: 0.0,
        });
        assert!(!v.validate(&s).mag_valid);
    }

    #[test]
    fn missing_subsystem_is_vacuously_valid() {
        let mut v = DataValidator::new(ValidatorThresholds::default());
        let mut s = base_sample();
        s.imu = None;
        s.mag = None;
        let q = v.validate(&s);
        assert!(q.imu_valid);
        assert!(q.mag_valid);
    }

    #[test]
    fn excessive_acceleration_fails_imu() {
        let mut v = DataValidator::new(ValidatorThresholds::default());
        let mut s = base_sample();
        s.imu = Some(ImuSample {
            accel_mps2: [0.0, 0.0, 25.0 * 9.81],
            gyro_dps: [0.0, 0.0, 0.0],
            accel_magnitude_mps2: 25.0 * 9.81,
            accel_magnitude_g: 25.0,
            gyro_magnitude_dps: 0.0,
        });
        assert!(!v.validate(&s).imu_valid);
        assert_eq!(v.stats().sensor_failures, 1);
    }
}
