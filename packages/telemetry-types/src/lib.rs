//! # telemetry-types
//!
//! Shared telemetry record structures for the ground-station pipeline.
//!
//! These types are used by:
//! - `telemetry-core`: parsing, filtering, and event-detecting raw packets
//! - any downstream consumer (HTTP/WebSocket bridge, CSV logger) that only
//!   needs to read the enriched record, not rebuild the pipeline
//!
//! ## Coordinate conventions
//!
//! - **Body frame**: axes fixed to the vehicle (raw IMU/mag readings).
//! - **NED frame**: North-East-Down local tangent frame anchored at a
//!   configured reference point; altitude = -Down component.
//! - **Quaternion**: (w, x, y, z), body-from-NED, unit norm.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Wire packet mode ──────────────────────────────────────────────────────────

/// Which Brunito frame variant a line decoded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetryMode {
    Armed,
    Recovery,
}

// ── Parsed sample ─────────────────────────────────────────────────────────────

/// Body-frame IMU reading, present only on Armed packets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImuSample {
    pub accel_mps2: [f64; 3],
    pub gyro_dps: [f64; 3],
    pub accel_magnitude_mps2: f64,
    pub accel_magnitude_g: f64,
    pub gyro_magnitude_dps: f64,
}

/// Magnetometer reading, present only on Armed packets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MagSample {
    pub mag_ut: [f64; 3],
    pub mag_magnitude_ut: f64,
}

/// One decoded telemetry line, with unit-converted fields and derived
/// magnitudes. Recovery packets carry `imu`/`mag` as `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSample {
    pub mode: TelemetryMode,
    pub timestamp: DateTime<Utc>,
    pub packet_id: u64,
    pub altitude_m: f64,
    pub imu: Option<ImuSample>,
    pub mag: Option<MagSample>,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub gps_satellites: u32,
    pub temperature_c: f64,
}

// ── Validation flags ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Quality {
    pub gps_valid: bool,
    pub imu_valid: bool,
    pub mag_valid: bool,
    pub baro_valid: bool,
    pub temp_valid: bool,
    pub overall_valid: bool,
}

// ── EKF output ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FilterHealth {
    pub is_healthy: bool,
    pub state_finite: bool,
    pub p_finite: bool,
    pub covariance_symmetric: bool,
    pub covariance_positive_definite: bool,
    pub quaternion_normalized: bool,
    pub position_uncertainty: [f64; 3],
    pub velocity_uncertainty: [f64; 3],
    pub max_uncertainty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteredState {
    /// NED, meters
    pub position_ned: [f64; 3],
    /// NED, m/s
    pub velocity_ned: [f64; 3],
    /// (w, x, y, z), body-from-NED
    pub quaternion: [f64; 4],
    /// Roll, pitch, yaw, degrees
    pub euler_angles_deg: [f64; 3],
    pub gyro_bias_rad_s: [f64; 3],
    pub accel_z_bias_mps2: f64,
    pub baro_bias_m: f64,
    /// Altitude, meters (= -position_ned[2])
    pub altitude: f64,
    pub speed: f64,
    /// Positive up
    pub vertical_velocity: f64,
    pub covariance_diagonal: [f64; 15],
    pub filter_health: FilterHealth,
}

// ── Flight phase & events ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightPhase {
    Idle,
    Armed,
    Launch,
    Boost,
    Burnout,
    Coast,
    Apogee,
    Descent,
    Landing,
    Landed,
}

impl std::fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// A single phase-transition event. `data` carries transition-specific
/// fields (see SPEC_FULL §4.4) and is left as a JSON value map since its
/// shape varies by transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightEvent {
    /// `"{FROM}_TO_{TO}"`, e.g. `"BOOST_TO_BURNOUT"`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub phase_transition: (FlightPhase, FlightPhase),
    pub data: HashMap<String, serde_json::Value>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApogeePrediction {
    pub predicted_time: Option<f64>,
    pub window_start: Option<f64>,
    pub window_end: Option<f64>,
    pub detected: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightStatistics {
    pub phase_durations: HashMap<String, f64>,
    pub max_acceleration_g: f64,
    pub max_velocity_mps: f64,
    pub max_altitude_m: f64,
    pub total_flight_time_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightSummary {
    pub current_phase: FlightPhase,
    pub mission_time_s: f64,
    pub statistics: FlightStatistics,
    pub phase_history: Vec<(DateTime<Utc>, FlightPhase)>,
    pub events: Vec<FlightEvent>,
    pub apogee_prediction: ApogeePrediction,
}

// ── Output record ──────────────────────────────────────────────────────────────

/// Enriched per-packet telemetry record, published once per input packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub sample: ParsedSample,
    pub quality: Quality,
    pub filtered_state: Option<FilteredState>,
    pub filter_error: Option<String>,
    pub flight_phase: FlightPhase,
    pub mission_time_s: f64,
    pub events: Vec<FlightEvent>,
    pub flight_summary: FlightSummary,
}

// ── Reference geodetic point (EKF NED origin) ─────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeodeticRef {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
}

impl Default for GeodeticRef {
    /// Starbase, TX — the reference point actually wired into the source
    /// Kalman filter's `_gps_to_ned`.
    fn default() -> Self {
        Self {
            lat_deg: 25.997222,
            lon_deg: -97.155556,
            alt_m: 8.0,
        }
    }
}
