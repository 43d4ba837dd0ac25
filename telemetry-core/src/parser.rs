//! Brunito wire-protocol parser.
//!
//! Pure, deterministic, re-entrant: no I/O, no shared mutable state besides
//! its own packet/error counters (SPEC_FULL §4.1). Grounded on
//! `examples/original_source/backend/src/telemetry/protocol.py`'s
//! `BrunitoParser` — field layout, scale table, and derived-magnitude set
//! are reproduced exactly.

use chrono::{NaiveDateTime, TimeZone, Utc};
use telemetry_types::{ImuSample, MagSample, ParsedSample, TelemetryMode};

use crate::error::TelemetryError;

const ARMED_FIELD_COUNT: usize = 16;
const RECOVERY_FIELD_COUNT: usize = 7;

/// Snapshot of parser counters, safe to read from outside the pipeline task
/// (SPEC_FULL §5: lock-free or tolerate a one-packet-stale read).
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserStats {
    pub packet_count: u64,
    pub error_count: u64,
}

pub struct BrunitoParser {
    packet_count: u64,
    error_count: u64,
}

impl Default for BrunitoParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BrunitoParser {
    pub fn new() -> Self {
        Self {
            packet_count: 0,
            error_count: 0,
        }
    }

    pub fn stats(&self) -> ParserStats {
        ParserStats {
            packet_count: self.packet_count,
            error_count: self.error_count,
        }
    }

    /// Parse one raw telemetry line. Returns `Ok(None)` would never happen —
    /// a line either decodes to a sample or fails with a typed error; the
    /// caller is responsible for dropping the packet on `Err`.
    pub fn parse(&mut self, line: &str) -> Result<ParsedSample, TelemetryError> {
        let trimmed = line.trim();
        if !trimmed.starts_with('<') || !trimmed.ends_with('>') || trimmed.len() < 2 {
            self.error_count += 1;
            return Err(TelemetryError::MalformedFrame);
        }

        let body = &trimmed[1..trimmed.len() - 1];
        let fields: Vec<&str> = body.split(',').collect();

        let result = match fields.len() {
            ARMED_FIELD_COUNT => self.parse_armed(&fields),
            RECOVERY_FIELD_COUNT => self.parse_recovery(&fields),
            _ => {
                self.error_count += 1;
                return Err(TelemetryError::MalformedFrame);
            }
        };

        match result {
            Ok(sample) => {
                self.packet_count += 1;
                Ok(sample)
            }
            Err(e) => {
                self.error_count += 1;
                Err(e)
            }
        }
    }

    fn parse_armed(&self, fields: &[&str]) -> Result<ParsedSample, TelemetryError> {
        let timestamp = parse_timestamp(fields[0], fields[1])?;
        let altitude_m = parse_f64(fields[2], "altitude_m")?;

        let accel_mps2 = [
            parse_i64(fields[3], "accel_x")? as f64 * 0.001 * 9.81,
            parse_i64(fields[4], "accel_y")? as f64 * 0.001 * 9.81,
            parse_i64(fields[5], "accel_z")? as f64 * 0.001 * 9.81,
        ];
        let gyro_dps = [
            parse_i64(fields[6], "gyro_x")? as f64 / 100.0,
            parse_i64(fields[7], "gyro_y")? as f64 / 100.0,
            parse_i64(fields[8], "gyro_z")? as f64 / 100.0,
        ];
        let mag_ut = [
            parse_i64(fields[9], "mag_x")? as f64 / 10.0,
            parse_i64(fields[10], "mag_y")? as f64 / 10.0,
            parse_i64(fields[11], "mag_z")? as f64 / 10.0,
        ];
        let latitude_deg = parse_i64(fields[12], "lat")? as f64 / 10_000_000.0;
        let longitude_deg = parse_i64(fields[13], "lon")? as f64 / 10_000_000.0;
        let gps_satellites = parse_i64(fields[14], "sats")?.max(0) as u32;
        let temperature_c = parse_i64(fields[15], "temp")? as f64;

        let accel_magnitude_mps2 = norm3(&accel_mps2);
        let gyro_magnitude_dps = norm3(&gyro_dps);
        let mag_magnitude_ut = norm3(&mag_ut);

        Ok(ParsedSample {
            mode: TelemetryMode::Armed,
            timestamp,
            packet_id: self.packet_count,
            altitude_m,
            imu: Some(ImuSample {
                accel_mps2,
                gyro_dps,
                accel_magnitude_mps2,
                accel_magnitude_g: accel_magnitude_mps2 / 9.81,
                gyro_magnitude_dps,
            }),
            mag: Some(MagSample {
                mag_ut,
                mag_magnitude_ut,
            }),
            latitude_deg,
            longitude_deg,
            gps_satellites,
            temperature_c,
        })
    }

    fn parse_recovery(&self, fields: &[&str]) -> Result<ParsedSample, TelemetryError> {
        let timestamp = parse_timestamp(fields[0], fields[1])?;
        let latitude_deg = parse_i64(fields[2], "lat")? as f64 / 10_000_000.0;
        let longitude_deg = parse_i64(fields[3], "lon")? as f64 / 10_000_000.0;
        let altitude_m = parse_f64(fields[4], "altitude_m")?;
        let gps_satellites = parse_i64(fields[5], "sats")?.max(0) as u32;
        let temperature_c = parse_i64(fields[6], "temp")? as f64;

        Ok(ParsedSample {
            mode: TelemetryMode::Recovery,
            timestamp,
            packet_id: self.packet_count,
            altitude_m,
            imu: None,
            mag: None,
            latitude_deg,
            longitude_deg,
            gps_satellites,
            temperature_c,
        })
    }
}

fn norm3(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

fn parse_f64(raw: &str, field: &'static str) -> Result<f64, TelemetryError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| TelemetryError::FieldDecode {
            field,
            reason: e.to_string(),
        })
}

fn parse_i64(raw: &str, field: &'static str) -> Result<i64, TelemetryError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| TelemetryError::FieldDecode {
            field,
            reason: e.to_string(),
        })
}

/// `MM/DD/YYYY` + `HH:MM:SS`, UTC assumed (SPEC_FULL §4.1).
fn parse_timestamp(
    date_str: &str,
    time_str: &str,
) -> Result<chrono::DateTime<Utc>, TelemetryError> {
    let combined = format!("{date_str},{time_str}");
    let naive = NaiveDateTime::parse_from_str(&combined, "%m/%d/%Y,%H:%M:%S").map_err(|e| {
        TelemetryError::FieldDecode {
            field: "timestamp",
            reason: e.to_string(),
        }
    })?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_armed_frame_with_exact_scales() {
        let mut parser = BrunitoParser::new();
        let line = "<05/27/2025,11:43:46,123.4,1000,-2000,9810,100,-200,50,15,-5,400,259972220,-971555560,8,22>";
        let sample = parser.parse(line).expect("valid armed frame");
        assert_eq!(sample.mode, TelemetryMode::Armed);
        let imu = sample.imu.expect("armed frame carries imu");
        assert!((imu.accel_mps2[0] - 9.81).abs() < 1e-9);
        assert!((imu.accel_mps2[1] - (-19.62)).abs() < 1e-9);
        assert!((imu.gyro_dps[0] - 1.0).abs() < 1e-9);
        let mag = sample.mag.expect("armed frame carries mag");
        assert!((mag.mag_ut[0] - 1.5).abs() < 1e-9);
        assert!((sample.latitude_deg - 25.997222).abs() < 1e-6);
        assert_eq!(sample.gps_satellites, 8);
        assert_eq!(sample.temperature_c, 22.0);
    }

    #[test]
    fn parses_recovery_frame() {
        let mut parser = BrunitoParser::new();
        let line = "<05/27/2025,11:43:46,259972220,-971555560,8.0,6,21>";
        let sample = parser.parse(line).expect("valid recovery frame");
        assert_eq!(sample.mode, TelemetryMode::Recovery);
        assert!(sample.imu.is_none());
        assert!(sample.mag.is_none());
        assert_eq!(sample.gps_satellites, 6);
    }

    #[test]
    fn rejects_missing_frame_delimiters() {
        let mut parser = BrunitoParser::new();
        let err = parser.parse("05/27/2025,11:43:46,1,2,3").unwrap_err();
        assert!(matches!(err, TelemetryError::MalformedFrame));
        assert_eq!(parser.stats().error_count, 1);
    }

    #[test]
    fn rejects_wrong_field_count() {
        let mut parser = BrunitoParser::new();
        let fields = vec!["1"; 10].join(",");
        let err = parser.parse(&format!("<{fields}>")).unwrap_err();
        assert!(matches!(err, TelemetryError::MalformedFrame));
    }

    #[test]
    fn packet_id_is_assigned_before_increment() {
        let mut parser = BrunitoParser::new();
        let line = "<05/27/2025,11:43:46,123.4,1000,-2000,9810,100,-200,50,15,-5,400,259972220,-971555560,8,22>";
        let first = parser.parse(line).unwrap();
        let second = parser.parse(line).unwrap();
        assert_eq!(first.packet_id, 0);
        assert_eq!(second.packet_id, 1);
        assert_eq!(parser.stats().packet_count, 2);
    }
}
